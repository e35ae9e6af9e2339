// src/preview.rs

use std::sync::Arc;

use crate::config::{RelayConfig, SamplerConfig};
use crate::recorder::meter::AmplitudeSample;
use crate::recorder::ring_window::RingWindowSampler;
use crate::relay::RelayHost;
use crate::waveform::Waveform;

/// Live waveform preview as seen from the host loop: amplitude ticks go in,
/// the most recent relayed snapshot comes out.
///
/// If the relay worker cannot be spawned the preview is disabled, but ticks
/// are still accepted so recording is unaffected.
pub struct LivePreview {
    sampler: RingWindowSampler,
    relay: Option<RelayHost>,
    current: Option<Arc<Waveform>>,
}

impl LivePreview {
    pub fn new(sampler: SamplerConfig, relay: &RelayConfig) -> Self {
        let relay = match RelayHost::spawn(relay.mailbox_capacity) {
            Ok(host) => Some(host),
            Err(e) => {
                log::warn!("Live preview disabled: {e}");
                None
            }
        };
        Self::with_relay(sampler, relay)
    }

    pub fn with_relay(sampler: SamplerConfig, relay: Option<RelayHost>) -> Self {
        Self {
            sampler: RingWindowSampler::new(sampler),
            relay,
            current: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.relay.is_some()
    }

    pub fn on_amplitude(&mut self, sample: Option<AmplitudeSample>) {
        let Some(snapshot) = self.sampler.push(sample) else {
            return;
        };
        let Some(relay) = self.relay.as_mut() else {
            return;
        };
        if let Err(e) = relay.send(snapshot) {
            log::warn!("Live snapshot not relayed: {e}");
        }
    }

    /// Most recent snapshot delivered so far; `None` until the first one.
    pub fn poll(&mut self) -> Option<Arc<Waveform>> {
        if let Some(latest) = self.relay.as_mut().and_then(RelayHost::latest) {
            self.current = Some(latest);
        }
        self.current.clone()
    }

    /// Clears the window and the displayed snapshot for a new take. The relay
    /// is replaced so nothing still in flight from the old take can surface.
    pub fn reset(&mut self) {
        self.sampler.reset();
        self.current = None;
        if let Some(old) = self.relay.take() {
            self.relay = match RelayHost::spawn(old.capacity()) {
                Ok(host) => Some(host),
                Err(e) => {
                    log::warn!("Live preview disabled: {e}");
                    None
                }
            };
        }
    }
}
