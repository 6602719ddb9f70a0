use futures::stream::StreamExt;
use std::env::args;
use std::process::exit;
use std::str::FromStr;
use std::time::Duration;
use xmpp_parsers::jid::Jid;
use xmpp_parsers::message::{Body, Message, MessageType};
use xmpp_parsers::presence::{Presence, Show as PresenceShow, Type as PresenceType};
use xmpp_session::{Client, Event, SessionConfig};

#[tokio::main]
async fn main() {
    env_logger::init();

    let args: Vec<String> = args().collect();
    if args.len() != 3 {
        println!("Usage: {} <jid> <password>", args[0]);
        exit(1);
    }
    let jid = Jid::from_str(&args[1]).expect(&format!("Invalid JID: {}", &args[1]));
    let password = &args[2];

    // Client instance
    let mut client = Client::new(SessionConfig::new(jid, password.to_owned()));

    // Main loop, processes events
    while let Some(event) = client.next().await {
        println!("event: {:?}", event);
        match event {
            Event::Online(info) => {
                let jid = info
                    .bound_jid
                    .map(|jid| format!("{}", jid))
                    .unwrap_or("unknown".to_owned());
                println!("Online at {} (resumed: {})", jid, info.resumed);

                if !info.resumed {
                    let presence = make_presence();
                    client.send_stanza(presence.into()).await.unwrap();
                }
            }
            Event::Disconnected { error, can_resume } => {
                println!("Disconnected: {:?}", error);
                if !can_resume {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(5)).await;
                client.reconnect().unwrap();
            }
            Event::Stanza(stanza) => {
                let Ok(message) = Message::try_from(stanza) else {
                    continue;
                };
                match (message.from, message.bodies.get("")) {
                    (Some(ref from), Some(ref body)) if body.0 == "die" => {
                        println!("Secret die command triggered by {}", from);
                        client.disconnect().unwrap();
                    }
                    (Some(ref from), Some(ref body)) => {
                        if message.type_ != MessageType::Error {
                            // This is a message we'll echo
                            let reply = make_reply(from.clone(), &body.0);
                            client.send_stanza(reply.into()).await.unwrap();
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

// Construct a <presence/>
fn make_presence() -> Presence {
    let mut presence = Presence::new(PresenceType::None);
    presence.show = Some(PresenceShow::Chat);
    presence
        .statuses
        .insert(String::from("en"), String::from("Echoing messages."));
    presence
}

// Construct a chat <message/>
fn make_reply(to: Jid, body: &str) -> Message {
    let mut message = Message::new(Some(to));
    message.bodies.insert(String::new(), Body(body.to_owned()));
    message
}
