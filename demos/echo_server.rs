//! Line-based echo server: every `\n`-terminated line is decoded as one
//! message and sent straight back.
//!
//! ```sh
//! cargo run --example echo_server
//! nc 127.0.0.1 8080
//! ```

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use sluice::{ChannelService, MessageProcessor, Protocol, Result, ServerConfig, Session};

struct LineProtocol;

impl Protocol for LineProtocol {
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        match buf.iter().position(|&b| b == b'\n') {
            Some(idx) => Ok(Some(buf.split_to(idx + 1).freeze())),
            None => Ok(None),
        }
    }
}

struct EchoProcessor;

impl MessageProcessor for EchoProcessor {
    fn init_session(&self, session: &mut Session) {
        println!("new session from {}", session.peer_addr());
    }

    fn process(&self, session: &mut Session, msg: Bytes) -> Result<()> {
        session.send(msg)
    }

    fn shutdown(&self) -> Result<()> {
        println!("echo processor shutting down");
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = ServerConfig::builder(Arc::new(EchoProcessor))
        .address("127.0.0.1:8080".parse()?)
        .protocol(Arc::new(|| Box::new(LineProtocol)))
        .build();

    let service = ChannelService::new(config);
    service.start()?;
    println!("echo server on {}", service.local_addr().unwrap());
    service.join();
    Ok(())
}
