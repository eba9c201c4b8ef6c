mod session;
mod vehicle;

use session::VehicleSession;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vehicle::Vehicle;

const DEFAULT_PORT: u16 = 8080;
const TELEMETRY_PERIOD: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let port = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => DEFAULT_PORT,
    };
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Vehicle simulator listening on :{}", port);

    // One car; every controller drives the same one
    let vehicle = Arc::new(Mutex::new(Vehicle::default()));

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("Controller connected: {}", addr);
        if let Err(e) = stream.set_nodelay(true) {
            error!("set_nodelay failed for {}: {}", addr, e);
        }

        let session = VehicleSession::new(stream, addr, vehicle.clone(), TELEMETRY_PERIOD);
        tokio::spawn(async move {
            if let Err(e) = session.run().await {
                error!("Session {} ended: {}", addr, e);
            }
        });
    }
}
