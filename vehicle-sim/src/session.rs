//! One controller connected to the simulated vehicle

use crate::vehicle::{Applied, Vehicle};
use anyhow::Result;
use rc_link_shared::LineDecoder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct VehicleSession {
    stream: TcpStream,
    addr: SocketAddr,
    vehicle: Arc<Mutex<Vehicle>>,
    telemetry_period: Duration,
}

impl VehicleSession {
    pub fn new(stream: TcpStream, addr: SocketAddr, vehicle: Arc<Mutex<Vehicle>>, telemetry_period: Duration) -> Self {
        Self {
            stream,
            addr,
            vehicle,
            telemetry_period,
        }
    }

    /// Apply commands and report battery until the controller goes away
    pub async fn run(self) -> Result<()> {
        let Self {
            stream,
            addr,
            vehicle,
            telemetry_period,
        } = self;
        let (mut reader, mut writer) = stream.into_split();
        let mut decoder = LineDecoder::new();
        let mut buf = vec![0u8; 1024];

        let mut ticker = interval(telemetry_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                read = reader.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        info!("Controller disconnected: {}", addr);
                        return Ok(());
                    }
                    decoder.extend(&buf[..n]);
                    loop {
                        match decoder.decode_next() {
                            Ok(Some(token)) => match vehicle.lock().await.apply(&token) {
                                Applied::Changed(what) => info!("[{}] {} -> {}", addr, token, what),
                                Applied::Unknown(token) => warn!("[{}] unknown command {:?}", addr, token),
                            },
                            Ok(None) => break,
                            Err(e) => warn!("[{}] dropped input: {}", addr, e),
                        }
                    }
                }
                _ = ticker.tick() => {
                    let level = vehicle.lock().await.drain();
                    debug!("[{}] BAT {}", addr, level);
                    writer.write_all(format!("BAT {level}\n").as_bytes()).await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_commands_applied_and_battery_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let vehicle = Arc::new(Mutex::new(Vehicle::default()));

        let shared = vehicle.clone();
        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.expect("accept");
            VehicleSession::new(stream, peer, shared, Duration::from_millis(20))
                .run()
                .await
        });

        let client = TcpStream::connect(addr).await.expect("connect");
        let (read, mut write) = client.into_split();
        write.write_all(b"G40\nS2").await.expect("write");
        write.write_all(b"5\nD\n").await.expect("write");

        let mut lines = tokio::io::BufReader::new(read).lines();
        let first = lines.next_line().await.expect("read").expect("line");
        assert!(first.starts_with("BAT "));

        // Let the commands land before checking
        tokio::time::sleep(Duration::from_millis(50)).await;
        {
            let car = vehicle.lock().await;
            assert_eq!(car.throttle, 40);
            assert_eq!(car.steering, 25);
            assert_eq!(car.gear, rc_link_shared::Gear::Drive);
        }

        drop(write);
        drop(lines);
        server.await.expect("join").ok();
    }
}
