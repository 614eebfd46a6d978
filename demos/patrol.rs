use log::{error, info};
use rover_serial::{
    connection::{serial, Session, SessionConfig},
    control::{Rover, RoverConfig},
    devices::{Drivetrain, NullRemote},
};

#[tokio::main]
async fn main() {
    simplelog::TermLogger::init(
        log::LevelFilter::Debug,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Always,
    )
    .unwrap();

    // Take a port path from the command line, or scan for a board
    let config = match std::env::args().nth(1) {
        Some(path) => SessionConfig::new(path),
        None => {
            let devices = serial::find_devices().unwrap();
            let Some(device) = devices.first() else {
                error!("No rover found on any serial port");
                return;
            };
            info!("Using {}", device.port_name);
            device.config()
        }
    };

    let session = match Session::open(&config).await {
        Ok(session) => session,
        Err(e) => {
            error!("Could not open {}: {e}", config.path);
            return;
        }
    };
    info!("Connected to the rover on {}", config.path);

    let mut rover = Rover::new(
        session,
        Drivetrain::new(),
        NullRemote,
        RoverConfig::default(),
    );

    rover
        .run(&config, async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await;
}
