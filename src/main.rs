//! Demo: ein Loopback-Call über das Silence-Gerät oder die Standard-Hardware
//!
//! `phone-calls [NUMMER]` ruft den Echo-Dienst an, hält den Call ein paar
//! Sekunden und legt wieder auf.

use anyhow::Context;
use phone_calls_lib::call_engine::Credentials;
use phone_calls_lib::config::PhoneCallsConfig;
use phone_calls_lib::signaling::{LoopbackConfig, LoopbackSignaling};
use phone_calls_lib::{init_tracing, HostEvent, PhoneCalls};
use std::time::Duration;

const CALL_DURATION: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = PhoneCallsConfig::load().context("loading config")?;
    init_tracing(&config.log_filter);

    let number = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "+15551234567".to_string());

    let phone = PhoneCalls::builder()
        .config(config)
        .signaling(LoopbackSignaling::new(LoopbackConfig::default()))
        .build();

    let mut events = phone.take_events().context("event stream already taken")?;
    let printer = tokio::spawn(async move {
        let mut audio_frames = 0u64;
        while let Some(event) = events.next().await {
            match &event {
                HostEvent::CallStateChanged(state) => {
                    tracing::info!("Host event: {}", event.to_json());
                    if state.is_terminal() {
                        break;
                    }
                }
                HostEvent::AudioData(_) => audio_frames += 1,
            }
        }
        audio_frames
    });

    if let Err(e) = phone.initialize(Credentials::new("demo-token")).await {
        tracing::warn!("Audio hardware not ready, retrying on connect: {}", e);
    }

    let started = phone
        .make_call(&number, "demo-call", Some("Echo"))
        .await
        .context("placing call")?;
    anyhow::ensure!(started, "call was not approved");

    tokio::time::sleep(CALL_DURATION).await;
    phone.toggle_mute(true).await?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    phone.end_call().await?;

    let audio_frames = printer.await.context("event printer")?;
    let stats = phone.stats().await?;
    tracing::info!(
        "Call finished: {} audio frames delivered, stats {}",
        audio_frames,
        serde_json::to_string(&stats)?
    );

    phone.shutdown().await?;
    Ok(())
}
