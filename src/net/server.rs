use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::net::packet::{PacketReader, PacketWriter};
use crate::net::wire::{recv_all, send_all, RecvOutcome};
use crate::telemetry::logging;
use crate::world::players::{identity_from_ip, PlayerTable, MAX_PLAYERS};

pub const OPCODE_REGISTER: u8 = 0x01;
pub const OPCODE_ACK: u8 = 0x81;
pub const OPCODE_SHUTDOWN: u8 = 0xff;

const ACK_FRAME_LEN: usize = 13;
const REGISTER_DIMS_LEN: usize = 9;
// Upper bound on declared source pixel bytes; anything larger is a protocol
// violation, not a clamping case.
const MAX_AVATAR_PAYLOAD: u64 = 64 * 1024;
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct PresenceServerConfig {
    pub bind_addr: String,
    pub max_clients: usize,
}

impl Default for PresenceServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7575".to_string(),
            max_clients: MAX_PLAYERS,
        }
    }
}

/// Process-wide stop flag shared by the acceptor and every worker.
#[derive(Debug, Default)]
pub struct ServerControl {
    shutdown: AtomicBool,
}

impl ServerControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::SeqCst)
    }
}

/// Live connection handles, used only for the capacity cap on accept and the
/// shutdown broadcast. Entries are stream clones; closing one closes the
/// worker's socket too.
#[derive(Debug)]
pub struct ClientRegistry {
    capacity: usize,
    next_conn_id: AtomicU64,
    handles: Mutex<Vec<(u64, TcpStream)>>,
}

impl ClientRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_conn_id: AtomicU64::new(1),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, stream: &TcpStream) -> Result<u64, String> {
        let clone = stream
            .try_clone()
            .map_err(|err| format!("stream clone failed: {}", err))?;
        let mut handles = self
            .handles
            .lock()
            .map_err(|_| "client registry lock poisoned".to_string())?;
        if handles.len() >= self.capacity {
            return Err(format!("client limit {} reached", self.capacity));
        }
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
        handles.push((conn_id, clone));
        Ok(conn_id)
    }

    pub fn remove(&self, conn_id: u64) {
        if let Ok(mut handles) = self.handles.lock() {
            handles.retain(|(id, _)| *id != conn_id);
        }
    }

    pub fn len(&self) -> usize {
        self.handles.lock().map(|handles| handles.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Best-effort shutdown opcode to every live client, then the sockets are
    /// closed so blocked workers unblock through their peer-closed path.
    pub fn broadcast_shutdown(&self) {
        let Ok(mut handles) = self.handles.lock() else {
            return;
        };
        for (_, stream) in handles.iter_mut() {
            let _ = send_all(stream, &[OPCODE_SHUTDOWN]);
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        handles.clear();
    }
}

pub fn run_presence_server(
    config: PresenceServerConfig,
    table: Arc<Mutex<PlayerTable>>,
    control: Arc<ServerControl>,
) -> Result<(), String> {
    let listener = TcpListener::bind(&config.bind_addr)
        .map_err(|err| format!("bind {} failed: {}", config.bind_addr, err))?;
    let registry = Arc::new(ClientRegistry::new(config.max_clients));
    accept_loop(listener, table, registry, control)
}

pub(crate) fn accept_loop(
    listener: TcpListener,
    table: Arc<Mutex<PlayerTable>>,
    registry: Arc<ClientRegistry>,
    control: Arc<ServerControl>,
) -> Result<(), String> {
    listener
        .set_nonblocking(true)
        .map_err(|err| format!("listener nonblocking failed: {}", err))?;

    let local_addr = listener
        .local_addr()
        .map_err(|err| format!("listener addr failed: {}", err))?;
    logging::log_game(&format!("presence server listening on {}", local_addr));
    println!("plaza: listening on {}", local_addr);

    while control.is_running() {
        match listener.accept() {
            Ok((stream, addr)) => {
                let conn_id = match registry.register(&stream) {
                    Ok(conn_id) => conn_id,
                    Err(err) => {
                        logging::log_netload(&format!("rejected {}: {}", addr, err));
                        drop(stream);
                        continue;
                    }
                };
                logging::log_netload(&format!("connection {} opened by {}", conn_id, addr));
                println!("plaza: connection from {}", addr);
                let table = Arc::clone(&table);
                let registry = Arc::clone(&registry);
                let control = Arc::clone(&control);
                thread::spawn(move || {
                    if let Err(err) =
                        handle_client_connection(stream, addr, conn_id, &table, &registry, &control)
                    {
                        logging::log_error(&format!("connection {} error: {}", conn_id, err));
                        eprintln!("plaza: connection error: {}", err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(err) => {
                logging::log_error(&format!("accept error: {}", err));
                eprintln!("plaza: accept error: {}", err);
            }
        }
    }

    registry.broadcast_shutdown();
    logging::log_game("presence server stopped");
    Ok(())
}

/// Worker entry for one client. Whatever way the session ends, the player row
/// is marked disconnected and the handle leaves the registry.
pub(crate) fn handle_client_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    conn_id: u64,
    table: &Arc<Mutex<PlayerTable>>,
    registry: &ClientRegistry,
    control: &ServerControl,
) -> Result<(), String> {
    let identity = identity_from_ip(addr.ip());
    let result = client_session_loop(&mut stream, identity, table, control);

    if let Ok(mut table) = table.lock() {
        table.mark_disconnected(identity);
    }
    registry.remove(conn_id);
    logging::log_netload(&format!("connection {} from {} closed", conn_id, addr));

    result
}

fn client_session_loop(
    stream: &mut TcpStream,
    identity: u32,
    table: &Arc<Mutex<PlayerTable>>,
    control: &ServerControl,
) -> Result<(), String> {
    while control.is_running() {
        let mut opcode = [0u8; 1];
        match recv_all(stream, &mut opcode)
            .map_err(|err| format!("opcode read failed: {}", err))?
        {
            RecvOutcome::Closed => return Ok(()),
            RecvOutcome::Complete => {}
        }

        match opcode[0] {
            OPCODE_REGISTER => handle_register(stream, identity, table)?,
            OPCODE_SHUTDOWN => {
                return Err("client sent server-only shutdown opcode".to_string());
            }
            other => return Err(format!("unknown opcode 0x{:02x}", other)),
        }
    }
    Ok(())
}

/// REGISTER payload: tag_len u8, tag bytes, width u32, height u32,
/// channels u8, then width*height*channels source pixel bytes.
fn handle_register(
    stream: &mut TcpStream,
    identity: u32,
    table: &Arc<Mutex<PlayerTable>>,
) -> Result<(), String> {
    let mut tag_len = [0u8; 1];
    read_payload(stream, &mut tag_len)?;
    let mut tag_raw = vec![0u8; tag_len[0] as usize];
    read_payload(stream, &mut tag_raw)?;

    let mut dims = [0u8; REGISTER_DIMS_LEN];
    read_payload(stream, &mut dims)?;
    let mut reader = PacketReader::new(&dims);
    let width = reader
        .read_u32_be()
        .ok_or_else(|| "register header truncated".to_string())?;
    let height = reader
        .read_u32_be()
        .ok_or_else(|| "register header truncated".to_string())?;
    let channels = reader
        .read_u8()
        .ok_or_else(|| "register header truncated".to_string())?;

    let declared = width as u64 * height as u64 * channels as u64;
    if declared > MAX_AVATAR_PAYLOAD {
        return Err(format!(
            "avatar payload {} exceeds limit {}",
            declared, MAX_AVATAR_PAYLOAD
        ));
    }
    let mut pixels = vec![0u8; declared as usize];
    read_payload(stream, &mut pixels)?;

    // One lock acquisition covers the whole find-or-create-and-update
    // sequence; the acknowledgement goes out after the lock is released.
    let (player_id, pos_x, pos_y, tag) = {
        let mut table = table
            .lock()
            .map_err(|_| "player table lock poisoned".to_string())?;
        let player = table
            .ensure(identity)
            .map_err(|err| format!("registration rejected: {}", err))?;
        player.set_tag(&tag_raw);
        player
            .set_avatar(&pixels, width, height, channels)
            .map_err(|err| format!("avatar update failed: {}", err))?;
        player.connected = true;
        (player.player_id, player.pos_x, player.pos_y, player.tag.clone())
    };

    let mut ack = PacketWriter::with_capacity(ACK_FRAME_LEN);
    ack.write_u8(OPCODE_ACK);
    ack.write_u32_be(player_id);
    ack.write_i32_be(pos_x);
    ack.write_i32_be(pos_y);
    send_all(stream, ack.as_slice()).map_err(|err| format!("ack send failed: {}", err))?;

    logging::log_game(&format!(
        "player {} ({}) registered at ({}, {})",
        player_id, tag, pos_x, pos_y
    ));
    Ok(())
}

/// Payload reads happen inside a frame, so an orderly close here is a
/// truncated message rather than a clean disconnect.
fn read_payload(stream: &mut TcpStream, buf: &mut [u8]) -> Result<(), String> {
    match recv_all(stream, buf) {
        Ok(RecvOutcome::Complete) => Ok(()),
        Ok(RecvOutcome::Closed) => Err("peer closed mid-message".to_string()),
        Err(err) => Err(format!("payload read failed: {}", err)),
    }
}
