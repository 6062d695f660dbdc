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

//! Byte transports a managed connection can run over

use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;

/// An upgraded, full-duplex byte stream
///
/// The manager splits the transport into independent read and write halves,
/// so implementations only need the Tokio I/O traits. `prepare` runs once
/// before registration; an error there is reported as an upgrade failure and
/// the connection is never registered.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Remote address, if the transport has one
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Apply socket options before the connection goes live
    fn prepare(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for TcpStream {
    fn peer_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }

    fn prepare(&mut self) -> io::Result<()> {
        self.set_nodelay(true)
    }
}

impl Transport for DuplexStream {}
