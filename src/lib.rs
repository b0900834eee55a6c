mod config;
mod net;
pub mod telemetry;
pub mod world;

pub use net::packet::{PacketReader, PacketWriter};
pub use net::server::{
    run_presence_server, ClientRegistry, PresenceServerConfig, ServerControl, OPCODE_ACK,
    OPCODE_REGISTER, OPCODE_SHUTDOWN,
};
pub use net::wire::{recv_all, send_all, RecvOutcome};
pub use world::avatar::{normalize_avatar, AvatarError, AvatarImage};
pub use world::players::{
    identity_from_ip, Player, PlayerTable, SpawnArea, TableFull, MAX_PLAYERS, MAX_TAG_BYTES,
};

pub fn run(args: &[String]) -> Result<(), String> {
    let config = config::AppConfig::from_args(args)?;
    telemetry::logging::init(&config.root)?;

    println!("plaza: presence server");
    println!("- root: {}", config.root.display());
    println!("- bind: {}", config.bind_addr);
    println!("- max clients: {}", config.max_clients);
    println!("- window: {}x{}", config.window_w, config.window_h);
    println!(
        "- spawn area: ({}, {}) -> ({}, {})",
        config.spawn_area.min_x,
        config.spawn_area.min_y,
        config.spawn_area.max_x,
        config.spawn_area.max_y
    );

    let table = std::sync::Arc::new(std::sync::Mutex::new(PlayerTable::new(
        config.max_clients,
        config.spawn_area,
    )));
    let control = std::sync::Arc::new(ServerControl::new());

    let server_config = PresenceServerConfig {
        bind_addr: config.bind_addr.clone(),
        max_clients: config.max_clients,
    };
    run_presence_server(server_config, table, control)
}
