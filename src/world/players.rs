use std::fmt;
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::world::avatar::{normalize_avatar, AvatarError, AvatarImage};

pub const MAX_PLAYERS: usize = 32;
pub const MAX_TAG_BYTES: usize = 31;

/// Rectangle of spawn positions, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnArea {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl SpawnArea {
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

impl Default for SpawnArea {
    fn default() -> Self {
        Self {
            min_x: 100,
            min_y: 100,
            max_x: 400,
            max_y: 400,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SpawnRng {
    state: u64,
}

impl SpawnRng {
    fn from_time() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_nanos() as u64)
            .unwrap_or(0x9e3779b97f4a7c15);
        Self { state: seed }
    }

    fn from_seed(seed: u64) -> Self {
        let seed = if seed == 0 { 0x9e3779b97f4a7c15 } else { seed };
        Self { state: seed }
    }

    fn roll_range(&mut self, min: i32, max: i32) -> i32 {
        if min >= max {
            return min;
        }
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        let span = (max as i64 - min as i64 + 1) as u64;
        let value = ((self.state >> 32) as u64) % span;
        min + value as i32
    }
}

/// One registered presence. Rows outlive their connection; `connected`
/// flips instead of the row being removed.
#[derive(Debug)]
pub struct Player {
    pub identity: u32,
    pub player_id: u32,
    pub tag: String,
    pub pos_x: i32,
    pub pos_y: i32,
    pub avatar: Option<AvatarImage>,
    pub connected: bool,
    pub sprite_created: bool,
    pub sprite_dirty: bool,
}

impl Player {
    fn new(identity: u32, player_id: u32, pos_x: i32, pos_y: i32) -> Self {
        Self {
            identity,
            player_id,
            tag: String::new(),
            pos_x,
            pos_y,
            avatar: None,
            connected: false,
            sprite_created: false,
            sprite_dirty: false,
        }
    }

    /// Normalizes and swaps in a new avatar. On failure the previous avatar
    /// stays untouched and the dirty flag is left alone.
    pub fn set_avatar(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        channels: u8,
    ) -> Result<(), AvatarError> {
        let image = normalize_avatar(pixels, width, height, channels)?;
        self.avatar = Some(image);
        self.sprite_dirty = true;
        Ok(())
    }

    pub fn set_tag(&mut self, raw: &[u8]) {
        self.tag = sanitize_tag(raw);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableFull;

impl fmt::Display for TableFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player table is full")
    }
}

/// Bounded roster of every identity that ever registered. Shared across
/// connection threads as `Arc<Mutex<PlayerTable>>`; callers hold the lock
/// for the whole find-or-create sequence and never across network I/O.
#[derive(Debug)]
pub struct PlayerTable {
    players: Vec<Player>,
    next_player_id: u32,
    capacity: usize,
    spawn_area: SpawnArea,
    rng: SpawnRng,
}

impl PlayerTable {
    pub fn new(capacity: usize, spawn_area: SpawnArea) -> Self {
        Self {
            players: Vec::with_capacity(capacity),
            next_player_id: 1,
            capacity,
            spawn_area,
            rng: SpawnRng::from_time(),
        }
    }

    pub fn with_seed(capacity: usize, spawn_area: SpawnArea, seed: u64) -> Self {
        Self {
            rng: SpawnRng::from_seed(seed),
            ..Self::new(capacity, spawn_area)
        }
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Read view for the rendering collaborator. The caller owns the lock
    /// while it walks the slice.
    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn find_by_identity(&self, identity: u32) -> Option<&Player> {
        self.players.iter().find(|player| player.identity == identity)
    }

    pub fn find_by_identity_mut(&mut self, identity: u32) -> Option<&mut Player> {
        self.players
            .iter_mut()
            .find(|player| player.identity == identity)
    }

    /// Returns the existing row for `identity` or appends a fresh one with
    /// the next player id and a random spawn position. Ids are never reused.
    pub fn ensure(&mut self, identity: u32) -> Result<&mut Player, TableFull> {
        if let Some(index) = self
            .players
            .iter()
            .position(|player| player.identity == identity)
        {
            return Ok(&mut self.players[index]);
        }

        if self.players.len() >= self.capacity {
            return Err(TableFull);
        }

        let player_id = self.next_player_id;
        self.next_player_id += 1;
        let pos_x = self.rng.roll_range(self.spawn_area.min_x, self.spawn_area.max_x);
        let pos_y = self.rng.roll_range(self.spawn_area.min_y, self.spawn_area.max_y);
        self.players
            .push(Player::new(identity, player_id, pos_x, pos_y));

        let index = self.players.len() - 1;
        Ok(&mut self.players[index])
    }

    pub fn mark_disconnected(&mut self, identity: u32) {
        if let Some(player) = self.find_by_identity_mut(identity) {
            player.connected = false;
        }
    }

    /// Called by the rendering collaborator once a presentation resource
    /// matches the stored avatar again. Returns false for unknown ids.
    pub fn mark_sprite_synced(&mut self, player_id: u32) -> bool {
        match self
            .players
            .iter_mut()
            .find(|player| player.player_id == player_id)
        {
            Some(player) => {
                player.sprite_created = true;
                player.sprite_dirty = false;
                true
            }
            None => false,
        }
    }
}

/// Table key for a peer: IPv4 octets as a big-endian u32. IPv4-mapped IPv6
/// collapses to the mapped address; other IPv6 addresses fold their four
/// 4-byte words together with XOR.
pub fn identity_from_ip(ip: IpAddr) -> u32 {
    match ip {
        IpAddr::V4(v4) => u32::from(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return u32::from(mapped);
            }
            v6.octets()
                .chunks(4)
                .fold(0u32, |acc, word| {
                    acc ^ u32::from_be_bytes([word[0], word[1], word[2], word[3]])
                })
        }
    }
}

/// Keeps printable ASCII only and caps the result at `MAX_TAG_BYTES`.
pub fn sanitize_tag(raw: &[u8]) -> String {
    raw.iter()
        .copied()
        .filter(|byte| byte.is_ascii_graphic() || *byte == b' ')
        .take(MAX_TAG_BYTES)
        .map(char::from)
        .collect()
}
