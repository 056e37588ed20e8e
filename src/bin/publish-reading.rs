//! SwiftMail sensor reading publisher
//!
//! Publishes one mailbox reading the way the gateway does, for exercising a
//! running monitor without the hardware.
//!
//! ## Usage
//!
//! ```bash
//! # Gateway JSON report, door closed, mail inside
//! publish-reading --device-id mailbox_01 --lux 3.5 --proximity 9100
//!
//! # Legacy "<lux>.<proximity>" text payload on swiftmail/sensors
//! publish-reading --legacy --lux 42.0 --proximity 1200
//!
//! # Another broker
//! publish-reading --broker-url mqtt://broker.example.com:1884 --lux 0.5 --proximity 9500
//! ```

use chrono::Utc;
use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use swiftmail::config::parse_broker_url;
use swiftmail::mailbox::{MailboxMonitor, SensorReading, Thresholds};
use swiftmail::protocol::validate_topic_name;
use tokio::time::{timeout, Duration};

const ACK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(
    name = "publish-reading",
    about = "Publish a mailbox sensor reading to an MQTT broker"
)]
struct Args {
    /// Broker URL (mqtt://, tcp://, mqtts:// or ssl://)
    #[arg(long, default_value = "mqtt://localhost:1883", env = "SWIFTMAIL_BROKER_URL")]
    broker_url: String,

    /// Gateway device identifier
    #[arg(long, default_value = "mailbox_01")]
    device_id: String,

    /// Light level in lux
    #[arg(long)]
    lux: f64,

    /// Proximity sensor reading
    #[arg(long)]
    proximity: i64,

    /// Topic to publish on (default depends on the payload format)
    #[arg(long)]
    topic: Option<String>,

    /// Publish the legacy "<lux>.<proximity>" text payload
    #[arg(long)]
    legacy: bool,

    /// Door counts as open above this light level
    #[arg(long, default_value_t = 18.0)]
    lux_open_threshold: f64,

    /// Mail counts as present above this proximity reading
    #[arg(long, default_value_t = 8000)]
    proximity_mail_threshold: i64,
}

fn build_payload(args: &Args) -> Result<(String, String), Box<dyn std::error::Error>> {
    let reading = SensorReading::new(args.lux, args.proximity);

    if args.legacy {
        let payload = reading
            .to_legacy()
            .ok_or("legacy payload needs both lux and proximity")?;
        let topic = args
            .topic
            .clone()
            .unwrap_or_else(|| "swiftmail/sensors".to_string());
        return Ok((topic, payload));
    }

    let mut monitor = MailboxMonitor::new(Thresholds {
        lux_open: args.lux_open_threshold,
        proximity_mail: args.proximity_mail_threshold,
    });
    let report = monitor.report(&args.device_id, &reading, Utc::now());
    let topic = args
        .topic
        .clone()
        .unwrap_or_else(|| format!("mailbox/{}/sensors", args.device_id));
    Ok((topic, serde_json::to_string(&report)?))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let (topic, payload) = build_payload(&args)?;
    validate_topic_name(&topic)?;

    let (host, port, tls) = parse_broker_url(&args.broker_url)?;
    if tls {
        return Err("TLS brokers are not supported by this tool".into());
    }

    let client_id = format!("publish-reading-{}", Utc::now().timestamp_millis());
    let mut options = MqttOptions::new(client_id, host.clone(), port);
    options.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(options, 10);

    println!("Publishing to {host}:{port}");
    println!("   Topic: {topic}");
    println!("   Payload: {payload}");

    client
        .publish(topic.as_str(), QoS::AtLeastOnce, false, payload.into_bytes())
        .await?;

    let acked = timeout(ACK_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::PubAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(e),
            }
        }
    })
    .await;

    match acked {
        Ok(Ok(())) => println!("Reading published"),
        Ok(Err(e)) => return Err(format!("MQTT eventloop error: {e}").into()),
        Err(_) => return Err("timed out waiting for PUBACK".into()),
    }

    client.disconnect().await?;
    // Flush the DISCONNECT packet
    let _ = timeout(Duration::from_secs(1), eventloop.poll()).await;

    Ok(())
}
