use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use certif_link::constants::CONSOLE_PROPERTY;
use certif_link::constants::ERROR_PROPERTY;
use certif_link::Client;
use certif_link::ClientConfig;
use certif_link::Command;
use certif_link::DataType;
use certif_link::FrameSink;
use certif_link::FrameSource;
use certif_link::Message;
use certif_link::NetworkConfig;
use certif_link::TcpTransport;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::debug;

/// Console commands the loopback server understands: command to
/// (printed lines, property updates applied before replying, reply).
pub type Commands = HashMap<String, (Vec<String>, Vec<(String, String)>, String)>;

/// Server state shared with the test for inspection.
#[derive(Debug, Default)]
pub struct ServerState {
    pub values: HashMap<String, String>,
    pub registered: HashSet<String>,
    pub received: Vec<Message>,
}

pub struct LoopbackServer {
    pub port: u16,
    pub state: Arc<Mutex<ServerState>>,
    task: JoinHandle<()>,
}

impl Drop for LoopbackServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl LoopbackServer {
    /// Serves one connection on an ephemeral port.
    pub async fn start(
        values: &[(&str, &str)],
        commands: Commands,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(ServerState {
            values: values.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            ..Default::default()
        }));

        let shared = state.clone();
        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut tx, mut rx) = TcpTransport::from_stream(stream, 1 << 20);
            while let Ok(msg) = rx.recv_frame().await {
                debug!(%msg, "server recv");
                let replies = answer(&mut shared.lock(), &commands, msg);
                for reply in replies {
                    if tx.send_frame(reply).await.is_err() {
                        return;
                    }
                }
            }
        });

        Self {
            port,
            state,
            task,
        }
    }

    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig {
            network: NetworkConfig {
                host: "127.0.0.1".to_string(),
                port: self.port,
                ..Default::default()
            },
            ..Default::default()
        };
        config.timeouts.subscribe_timeout_in_ms = 200;
        config.timeouts.read_timeout_in_ms = 500;
        config.timeouts.write_error_wait_in_ms = 50;
        config
    }

    pub async fn connect(&self) -> Client {
        crate::enable_logger();
        Client::connect(self.config()).await.unwrap()
    }

    pub fn count_received(
        &self,
        command: Command,
        property: &str,
    ) -> usize {
        self.state
            .lock()
            .received
            .iter()
            .filter(|m| m.command == command && m.property_name == property)
            .count()
    }
}

fn answer(
    state: &mut ServerState,
    commands: &Commands,
    msg: Message,
) -> Vec<Message> {
    let property = msg.property_name.clone();
    let sn = msg.sequence_number;
    let command = msg.command;
    let body = msg.body_str();
    state.received.push(msg);

    match command {
        Command::Register => {
            if property == ERROR_PROPERTY || property == CONSOLE_PROPERTY {
                state.registered.insert(property);
                return Vec::new();
            }
            match state.values.get(&property) {
                Some(value) => {
                    let event = Message::event(property.as_str(), DataType::String, value.as_str());
                    state.registered.insert(property);
                    vec![event]
                }
                None => vec![Message::event(
                    ERROR_PROPERTY,
                    DataType::String,
                    format!("Property {property} does not exist"),
                )],
            }
        }
        Command::Unregister => {
            state.registered.remove(&property);
            Vec::new()
        }
        Command::ChanRead => match state.values.get(&property) {
            Some(value) => vec![Message::reply(sn, DataType::String, value.as_str())],
            None => vec![Message::reply(sn, DataType::Error, "no such property")],
        },
        Command::ChanSend => {
            if !state.values.contains_key(&property) {
                return vec![Message::reply(sn, DataType::Error, "no such property")];
            }
            store(state, &property, &body)
        }
        Command::FuncWithReturn => {
            let name = property.trim_end_matches('\n');
            let Some((printed, updates, reply)) = commands.get(name) else {
                return vec![Message::reply(sn, DataType::String, "")];
            };
            let mut out: Vec<Message> = printed
                .iter()
                .map(|line| Message::event(CONSOLE_PROPERTY, DataType::String, format!("{line}\n")))
                .collect();
            for (p, v) in updates {
                out.extend(store(state, p, v));
            }
            out.push(Message::event(CONSOLE_PROPERTY, DataType::String, "1.SPEC> \n"));
            out.push(Message::reply(sn, DataType::String, reply.as_str()));
            out
        }
        _ => Vec::new(),
    }
}

fn store(
    state: &mut ServerState,
    property: &str,
    value: &str,
) -> Vec<Message> {
    state.values.insert(property.to_string(), value.to_string());
    if state.registered.contains(property) {
        vec![Message::event(property, DataType::String, value)]
    } else {
        Vec::new()
    }
}

pub fn command(
    name: &str,
    printed: &[&str],
    updates: &[(&str, &str)],
    reply: &str,
) -> (String, (Vec<String>, Vec<(String, String)>, String)) {
    (
        name.to_string(),
        (
            printed.iter().map(|s| s.to_string()).collect(),
            updates.iter().map(|(p, v)| (p.to_string(), v.to_string())).collect(),
            reply.to_string(),
        ),
    )
}
