use std::collections::HashMap;
use std::collections::HashSet;

use super::Responder;
use crate::constants::variable_property;
use crate::constants::CONSOLE_PROPERTY;
use crate::constants::COUNTERS_VARIABLE;
use crate::constants::ERROR_PROPERTY;
use crate::Command;
use crate::DataType;
use crate::Message;

/// What the fake console does for one command.
#[derive(Debug, Clone, Default)]
pub struct Script {
    reply: String,
    printed: Vec<String>,
    changes: Vec<Change>,
}

#[derive(Debug, Clone)]
enum Change {
    Push(String, String),
    Update(String, String),
}

impl Script {
    pub fn reply(body: &str) -> Self {
        Self {
            reply: body.to_string(),
            ..Default::default()
        }
    }

    /// A line the command prints on the console before finishing.
    pub fn print(
        mut self,
        line: &str,
    ) -> Self {
        self.printed.push(line.to_string());
        self
    }

    /// An event pushed while the command runs, without changing the stored
    /// value.
    pub fn push(
        mut self,
        property: &str,
        value: &str,
    ) -> Self {
        self.changes.push(Change::Push(property.to_string(), value.to_string()));
        self
    }

    /// A stored value the command changes. Subscribers see it pushed.
    pub fn update(
        mut self,
        property: &str,
        value: &str,
    ) -> Self {
        self.changes.push(Change::Update(property.to_string(), value.to_string()));
        self
    }
}

/// Rule-based stand-in for the instrument server.
///
/// Known properties push their value on REGISTER and answer reads;
/// unknown ones produce the server-wide `error` event or an error reply.
/// Writes are silent on success, like the real server.
#[derive(Debug, Default)]
pub struct FakeInstrument {
    values: HashMap<String, String>,
    silent: HashSet<String>,
    commands: HashMap<String, Script>,
    registered: HashSet<String>,
}

impl FakeInstrument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(
        mut self,
        property: &str,
        value: &str,
    ) -> Self {
        self.values.insert(property.to_string(), value.to_string());
        self
    }

    /// A property that exists but never pushes on REGISTER.
    pub fn silent_property(
        mut self,
        property: &str,
        value: &str,
    ) -> Self {
        self.silent.insert(property.to_string());
        self.property(property, value)
    }

    pub fn command(
        mut self,
        command: &str,
        script: Script,
    ) -> Self {
        self.commands.insert(command.to_string(), script);
        self
    }

    /// Declares `counters` as `(mnemonic, name, value)` and answers the
    /// console calls that enumerate them.
    pub fn counters(
        mut self,
        counters: &[(&str, &str, &str)],
    ) -> Self {
        self = self.property(&variable_property(COUNTERS_VARIABLE), &counters.len().to_string());
        for (i, (mnemonic, name, value)) in counters.iter().enumerate() {
            self = self
                .command(&format!("cnt_mne({i})"), Script::reply(mnemonic))
                .command(&format!("cnt_name({i})"), Script::reply(name))
                .property(&format!("scaler/{mnemonic}/value"), value);
        }
        self
    }

    pub fn responder(mut self) -> Responder {
        Box::new(move |msg: &Message| self.answer(msg))
    }

    fn answer(
        &mut self,
        msg: &Message,
    ) -> Vec<Message> {
        let property = msg.property_name.as_str();
        match msg.command {
            Command::Register => {
                self.registered.insert(property.to_string());
                if property == ERROR_PROPERTY || property == CONSOLE_PROPERTY || self.silent.contains(property) {
                    return Vec::new();
                }
                match self.values.get(property) {
                    Some(value) => vec![Message::event(property, DataType::String, value.as_str())],
                    None => {
                        self.registered.remove(property);
                        vec![Message::event(
                            ERROR_PROPERTY,
                            DataType::String,
                            format!("Property {property} does not exist"),
                        )]
                    }
                }
            }
            Command::Unregister => {
                self.registered.remove(property);
                Vec::new()
            }
            Command::ChanRead => match self.values.get(property) {
                Some(value) => vec![Message::reply(msg.sequence_number, DataType::String, value.as_str())],
                None => vec![not_found(msg.sequence_number, property)],
            },
            Command::ChanSend => {
                if self.values.contains_key(property) {
                    self.store(property, &msg.body_str())
                } else {
                    vec![not_found(msg.sequence_number, property)]
                }
            }
            Command::FuncWithReturn => self.run(msg),
            _ => Vec::new(),
        }
    }

    fn run(
        &mut self,
        msg: &Message,
    ) -> Vec<Message> {
        let command = msg.property_name.trim_end_matches('\n');
        let Some(script) = self.commands.get(command).cloned() else {
            return vec![Message::reply(msg.sequence_number, DataType::String, "")];
        };

        let mut out = Vec::new();
        for line in &script.printed {
            out.push(Message::event(CONSOLE_PROPERTY, DataType::String, format!("{line}\n")));
        }
        for change in &script.changes {
            match change {
                Change::Push(property, value) => {
                    if self.registered.contains(property) {
                        out.push(Message::event(property.as_str(), DataType::String, value.as_str()));
                    }
                }
                Change::Update(property, value) => out.extend(self.store(property, value)),
            }
        }
        out.push(Message::event(CONSOLE_PROPERTY, DataType::String, "1.FAKE> \n"));
        out.push(Message::reply(msg.sequence_number, DataType::String, script.reply.as_str()));
        out
    }

    fn store(
        &mut self,
        property: &str,
        value: &str,
    ) -> Vec<Message> {
        self.values.insert(property.to_string(), value.to_string());
        if self.registered.contains(property) {
            vec![Message::event(property, DataType::String, value)]
        } else {
            Vec::new()
        }
    }
}

fn not_found(
    sn: u32,
    property: &str,
) -> Message {
    Message::reply(sn, DataType::Error, format!("Property {property} does not exist"))
}
