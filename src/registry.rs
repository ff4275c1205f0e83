use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::SchemaError;
use crate::schema::{Command, CommandGroup, CommandSchema};

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                         Command Registry
// —————————————————————————————————————————————————————————————————————————————————————————————————

/// Read-only command set with two indices: (cid1, cid2) and key.
///
/// Both indices point into the same `commands` list. Built once, shared behind an `Arc`.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: Vec<Arc<Command>>,
    by_id:    HashMap<(u8, u8), usize>,
    by_key:   HashMap<String, usize>,
}

impl CommandRegistry {
    /// Indexes `commands`, rejecting duplicate id pairs and duplicate keys
    pub fn new(commands: Vec<Command>) -> Result<Self, SchemaError> {
        let mut registry = Self {
            commands: Vec::with_capacity(commands.len()),
            by_id:    HashMap::with_capacity(commands.len()),
            by_key:   HashMap::with_capacity(commands.len()),
        };

        for command in commands {
            let index = registry.commands.len();

            if let Some(&first) = registry.by_id.get(&(command.id1, command.id2)) {
                return Err(SchemaError::DuplicateId {
                    id1:    command.id1,
                    id2:    command.id2,
                    first:  registry.commands[first].key.clone(),
                    second: command.key,
                });
            }
            if registry.by_key.contains_key(&command.key) {
                return Err(SchemaError::DuplicateKey(command.key));
            }

            registry.by_id.insert((command.id1, command.id2), index);
            registry.by_key.insert(command.key.clone(), index);
            registry.commands.push(Arc::new(command));
        }

        debug!("Command registry built with {} commands", registry.commands.len());
        Ok(registry)
    }

    pub fn from_schema(schema: CommandSchema) -> Result<Self, SchemaError> {
        Self::new(schema.into_commands()?)
    }

    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        Self::from_schema(CommandSchema::from_json_str(json)?)
    }

    // ——————————————————————————————————————————— Lookup ————————————————————————————————————————————

    pub fn get_by_id(&self, id1: u8, id2: u8) -> Option<&Arc<Command>> {
        let command = self.by_id.get(&(id1, id2)).map(|&i| &self.commands[i]);
        debug!("Lookup cid1={id1:#04X} cid2={id2:#04X}: {:?}", command.map(|c| &c.key));
        command
    }

    pub fn get_by_key(&self, key: &str) -> Option<&Arc<Command>> {
        let command = self.by_key.get(key).map(|&i| &self.commands[i]);
        debug!("Lookup key '{key}': found = {}", command.is_some());
        command
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Command>> {
        self.commands.iter()
    }

    pub fn group(&self, group: CommandGroup) -> impl Iterator<Item = &Arc<Command>> {
        self.commands.iter().filter(move |c| c.group == group)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                              Tests
// —————————————————————————————————————————————————————————————————————————————————————————————————
