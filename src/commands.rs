use crate::error::{Result, TurboPadError};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Accept poll period. Also bounds how long `stop` waits.
const ACCEPT_POLL: Duration = Duration::from_millis(10);
const CLIENT_TIMEOUT: Duration = Duration::from_millis(500);

/// Control commands, with their wire ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    EnableTurbo,
    DisableTurbo,
    EnableRemap,
    DisableRemap,
    ReloadBasic,
    ReloadTurbo,
    ReloadRemap,
    EnableMacro,
    DisableMacro,
    ReloadMacro,
    ReloadWhitelist,
    RecordStart,
    RecordCancel,
    Exit,
}

impl Command {
    pub fn id(self) -> u32 {
        match self {
            Command::EnableTurbo => 1,
            Command::DisableTurbo => 2,
            Command::EnableRemap => 3,
            Command::DisableRemap => 4,
            Command::ReloadBasic => 5,
            Command::ReloadTurbo => 6,
            Command::ReloadRemap => 7,
            Command::EnableMacro => 8,
            Command::DisableMacro => 9,
            Command::ReloadMacro => 10,
            Command::ReloadWhitelist => 11,
            Command::RecordStart => 12,
            Command::RecordCancel => 13,
            Command::Exit => 999,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        let command = match id {
            1 => Command::EnableTurbo,
            2 => Command::DisableTurbo,
            3 => Command::EnableRemap,
            4 => Command::DisableRemap,
            5 => Command::ReloadBasic,
            6 => Command::ReloadTurbo,
            7 => Command::ReloadRemap,
            8 => Command::EnableMacro,
            9 => Command::DisableMacro,
            10 => Command::ReloadMacro,
            11 => Command::ReloadWhitelist,
            12 => Command::RecordStart,
            13 => Command::RecordCancel,
            999 => Command::Exit,
            _ => return None,
        };
        Some(command)
    }
}

/// Reply code sent back for every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 0,
    /// Unknown id or malformed request.
    UnknownCommand = 1,
    Failed = 2,
}

impl Status {
    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Status::Ok),
            1 => Some(Status::UnknownCommand),
            2 => Some(Status::Failed),
            _ => None,
        }
    }
}

/// Receiver of decoded commands. Runs on the command thread.
pub trait CommandHandler: Send + Sync {
    fn handle(&self, command: Command) -> Result<()>;
}

/// Single-client request/response server: accept, read one `u32` command id,
/// reply with one `u32` status, close.
pub struct CommandServer {
    running: Arc<AtomicBool>,
    local_addr: SocketAddr,
    thread_handle: Option<std::thread::JoinHandle<()>>,
}

impl CommandServer {
    pub fn start(addr: impl ToSocketAddrs, handler: Arc<dyn CommandHandler>) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let handle = std::thread::Builder::new()
            .name("turbopad-commands".into())
            .spawn(move || server_loop(listener, &thread_running, &*handler))?;

        log::info!("Command channel listening on {}", local_addr);
        Ok(Self {
            running,
            local_addr,
            thread_handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// False once stopped or after serving `Exit`.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CommandServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn server_loop(listener: TcpListener, running: &AtomicBool, handler: &dyn CommandHandler) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                log::debug!("Command client {}", peer);
                if serve_client(stream, handler) == Some(Command::Exit) {
                    running.store(false, Ordering::SeqCst);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => std::thread::sleep(ACCEPT_POLL),
            Err(e) => {
                log::warn!("Command accept failed: {}", e);
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
    log::info!("Command channel closed");
}

/// Serve one request. Returns the command that was handled, if any.
fn serve_client(mut stream: TcpStream, handler: &dyn CommandHandler) -> Option<Command> {
    if let Err(e) = stream
        .set_nonblocking(false)
        .and_then(|_| stream.set_read_timeout(Some(CLIENT_TIMEOUT)))
        .and_then(|_| stream.set_write_timeout(Some(CLIENT_TIMEOUT)))
    {
        log::warn!("Cannot configure command client: {}", e);
        return None;
    }

    let mut request = [0u8; 4];
    let (command, status) = match stream.read_exact(&mut request) {
        Ok(()) => {
            let id = u32::from_le_bytes(request);
            match Command::from_id(id) {
                Some(command) => {
                    log::info!("Command {:?}", command);
                    let status = match handler.handle(command) {
                        Ok(()) => Status::Ok,
                        Err(e) => {
                            log::error!("Command {:?} failed: {}", command, e);
                            Status::Failed
                        }
                    };
                    (Some(command), status)
                }
                None => {
                    log::warn!("Unknown command id {}", id);
                    (None, Status::UnknownCommand)
                }
            }
        }
        Err(e) => {
            log::warn!("Malformed command request: {}", e);
            (None, Status::UnknownCommand)
        }
    };

    if let Err(e) = stream.write_all(&(status as u32).to_le_bytes()) {
        log::debug!("Command reply not delivered: {}", e);
    }
    let _ = stream.shutdown(Shutdown::Both);
    command
}

/// Client side: connect, send `command`, return the server's status.
pub fn send_command(addr: SocketAddr, command: Command) -> Result<Status> {
    let mut stream = TcpStream::connect_timeout(&addr, CLIENT_TIMEOUT)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    stream.write_all(&command.id().to_le_bytes())?;
    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply)?;
    let raw = u32::from_le_bytes(reply);
    Status::from_u32(raw)
        .ok_or_else(|| TurboPadError::Command(format!("unexpected status {}", raw)))
}
