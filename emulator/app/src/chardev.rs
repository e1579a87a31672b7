/*++

Licensed under the Apache-2.0 license.

File Name:

    chardev.rs

Abstract:

    File contains the host side of the character devices: TCP servers
    feeding a device frontend, and the console backend.

--*/

use ot_emu_bus::{pump, CharBackend, CharFrontend, CharPipe};
use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};

/// Serves one TCP client at a time. Bytes from the client go to a device
/// frontend; bytes the device writes into `tx` go back to the client.
pub struct SocketServer {
    name: &'static str,
    listener: TcpListener,
    client: Option<TcpStream>,
    rx: VecDeque<u8>,
    tx: CharPipe,
}

/// What happened during one [`SocketServer::service`] call.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct Activity {
    pub bytes: usize,
    pub disconnected: bool,
}

impl SocketServer {
    pub fn bind(name: &'static str, port: u16, tx: CharPipe) -> io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        listener.set_nonblocking(true)?;
        log::info!("{name}: listening on {}", listener.local_addr()?);
        Ok(Self {
            name,
            listener,
            client: None,
            rx: VecDeque::new(),
            tx,
        })
    }

    pub fn service(&mut self, frontend: &mut dyn CharFrontend) -> io::Result<Activity> {
        let mut activity = Activity::default();
        if self.client.is_none() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(true)?;
                    stream.set_nodelay(true)?;
                    log::info!("{}: client {peer} connected", self.name);
                    // output produced while nobody listened is dropped
                    self.tx.take();
                    self.client = Some(stream);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(activity),
                Err(err) => return Err(err),
            }
        }
        let Some(stream) = self.client.as_mut() else {
            return Ok(activity);
        };

        let mut closed = false;
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(n) => {
                    self.rx.extend(&buf[..n]);
                    activity.bytes += n;
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    log::warn!("{}: read error: {err}", self.name);
                    closed = true;
                    break;
                }
            }
        }

        pump(frontend, &mut self.rx);

        let out = self.tx.take();
        if !out.is_empty() && !closed {
            activity.bytes += out.len();
            stream.set_nonblocking(false)?;
            if let Err(err) = stream.write_all(&out) {
                log::warn!("{}: write error: {err}", self.name);
                closed = true;
            }
            stream.set_nonblocking(true)?;
        }

        if closed {
            log::info!("{}: client disconnected", self.name);
            self.client = None;
            self.rx.clear();
            activity.disconnected = true;
        }
        Ok(activity)
    }
}

/// Writes device output to the standard output.
pub struct Console;

impl CharBackend for Console {
    fn write_all(&mut self, buf: &[u8]) {
        let mut out = io::stdout();
        if out.write_all(buf).and_then(|_| out.flush()).is_err() {
            log::warn!("console: cannot write to stdout");
        }
    }
}
