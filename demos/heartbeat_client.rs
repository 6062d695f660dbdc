//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Heartbeat Client Example
//!
//! Connects to the echo server, answers every heartbeat probe, and sends a
//! message every few seconds. Pass `--silent` to go quiet instead and watch
//! the server drop the connection once its heartbeat deadline passes.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --example heartbeat_client -- 127.0.0.1:8999
//! cargo run --example heartbeat_client -- 127.0.0.1:8999 --silent
//! ```

use futures::{SinkExt, StreamExt};
use heartwire_codec::{Frame, JsonCodec};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:8999".to_string());
    let silent = args.any(|arg| arg == "--silent");

    println!("Connecting to {}", addr);
    let stream = TcpStream::connect(&addr).await?;
    let mut framed = Framed::new(stream, JsonCodec::new());

    let mut ticker = tokio::time::interval(Duration::from_secs(3));
    let mut sequence = 0u64;

    loop {
        tokio::select! {
            frame = framed.next() => match frame {
                Some(Ok(Frame::Heartbeat { timestamp })) => {
                    println!("<- heartbeat {}", timestamp);
                    if !silent {
                        framed.send(Frame::Heartbeat { timestamp }).await?;
                    }
                }
                Some(Ok(Frame::Close { reason })) => {
                    println!("<- closed by server: {}", reason);
                    break;
                }
                Some(Ok(Frame::Message { payload, .. })) => {
                    println!("<- {}", String::from_utf8_lossy(&payload));
                }
                Some(Err(e)) => {
                    eprintln!("Read error: {}", e);
                    break;
                }
                None => {
                    println!("Server hung up");
                    break;
                }
            },
            _ = ticker.tick(), if !silent => {
                sequence += 1;
                let line = format!("{{\"type\":\"chat\",\"data\":\"message {}\"}}", sequence);
                println!("-> {}", line);
                framed.send(Frame::text(line)).await?;
            }
        }
    }

    Ok(())
}
