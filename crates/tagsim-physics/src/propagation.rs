//! Turning transmissions into per-receiver arrivals and receptions.

use crate::{
    invalid, propagation_delay, superpose, wavelength, Arrival, ExciterConfig, PropagationConfig,
    Reception, ReceptionLedger, Signal,
};
use num_complex::Complex64;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::collections::HashMap;
use tagsim_common::{ArrivalId, ConfigError, Position, SimTime, TagId};
use tracing::trace;

/// An arrival the caller must schedule as an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledArrival {
    /// Receiving tag.
    pub receiver: TagId,
    /// Ledger entry to look up when the event fires.
    pub arrival: ArrivalId,
    /// When the signal reaches the receiver.
    pub time: SimTime,
}

/// Propagation state for one run.
pub struct PropagationModel {
    config: PropagationConfig,
    exciter: Option<ExciterConfig>,
    window: SimTime,
    ledgers: Vec<ReceptionLedger>,
    last_distance: HashMap<(TagId, TagId), f64>,
    next_arrival: u64,
    rng: ChaCha8Rng,
    noise: Option<Normal<f64>>,
}

impl PropagationModel {
    /// Create a model for `tag_count` tags; `seed` drives receiver noise.
    pub fn new(
        config: PropagationConfig,
        exciter: Option<ExciterConfig>,
        tag_count: usize,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if let Some(exciter) = &exciter {
            exciter.validate()?;
        }

        let window = SimTime::from_secs_f64(config.resolution_window_s)
            .ok_or_else(|| invalid("propagation.resolution_window_s", "not representable"))?;
        let noise = if config.noise_std > 0.0 {
            Some(
                Normal::new(0.0, config.noise_std)
                    .map_err(|e| invalid("propagation.noise_std", &e.to_string()))?,
            )
        } else {
            None
        };

        Ok(PropagationModel {
            config,
            exciter,
            window,
            ledgers: (0..tag_count).map(|_| ReceptionLedger::new()).collect(),
            last_distance: HashMap::new(),
            next_arrival: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
            noise,
        })
    }

    /// Propagation parameters.
    pub fn config(&self) -> &PropagationConfig {
        &self.config
    }

    /// Exciter, if configured.
    pub fn exciter(&self) -> Option<&ExciterConfig> {
        self.exciter.as_ref()
    }

    /// Carrier field of the exciter at a position (zero without an exciter).
    pub fn exciter_field(&self, at: &Position) -> Complex64 {
        match &self.exciter {
            Some(exciter) => {
                let d = exciter.position.distance_to(at);
                exciter.amplitude
                    * self
                        .config
                        .path_loss
                        .gain(d, wavelength(exciter.frequency_hz))
            }
            None => Complex64::new(0.0, 0.0),
        }
    }

    /// Phasor a tag emits.
    ///
    /// `reflection` is the coefficient of the active antenna state. With an
    /// exciter the tag only reflects, so the result is scaled by the carrier
    /// field at the tag.
    pub fn emitted_phasor(&self, at: &Position, amplitude: f64, reflection: f64, phase: f64) -> Complex64 {
        let own = Complex64::from_polar(amplitude * reflection, phase);
        match self.exciter {
            Some(_) => own * self.exciter_field(at),
            None => own,
        }
    }

    /// Deliver a signal to every receiver in range.
    ///
    /// The sender itself is skipped. Returned arrivals are in receiver order.
    pub fn transmit<I>(&mut self, signal: &Signal, receivers: I) -> Vec<ScheduledArrival>
    where
        I: IntoIterator<Item = (TagId, Position)>,
    {
        let lambda = wavelength(signal.frequency_hz);
        let mut scheduled = Vec::new();

        for (receiver, position) in receivers {
            if receiver == signal.sender {
                continue;
            }
            let Some(ledger) = self.ledgers.get_mut(receiver.index()) else {
                continue;
            };

            let distance = signal.position.distance_to(&position);
            if distance > self.config.range_m {
                continue;
            }

            let previous = self
                .last_distance
                .insert((signal.sender, receiver), distance);
            let id = ArrivalId(self.next_arrival);
            self.next_arrival += 1;
            let time = signal.emitted_at + propagation_delay(distance);
            let phasor = signal.phasor * self.config.path_loss.gain(distance, lambda);

            trace!(
                sender = %signal.sender,
                receiver = %receiver,
                distance,
                magnitude = phasor.norm(),
                "arrival scheduled at {}",
                time
            );

            ledger.insert(Arrival {
                id,
                sender: signal.sender,
                time,
                phasor,
                distance_m: distance,
                previous_distance_m: previous,
                frequency_hz: signal.frequency_hz,
            });
            scheduled.push(ScheduledArrival {
                receiver,
                arrival: id,
                time,
            });
        }
        scheduled
    }

    /// Collect the reception that arrival `id` opens at `receiver`.
    ///
    /// `None` means the arrival was already merged into an earlier reception.
    pub fn receive(&mut self, receiver: TagId, at: &Position, id: ArrivalId) -> Option<Reception> {
        let window = self.window;
        let arrivals = self.ledgers.get_mut(receiver.index())?.take_window(id, window)?;
        let first = arrivals.first()?.clone();

        let mut field = superpose(arrivals.iter().map(|a| a.phasor)) + self.exciter_field(at);
        if let Some(noise) = &self.noise {
            field += Complex64::new(noise.sample(&mut self.rng), noise.sample(&mut self.rng));
        }

        Some(Reception {
            voltage: self.config.detector.voltage(field),
            phase: field.arg(),
            field,
            arrivals: arrivals.len(),
            sender: first.sender,
            distance_m: first.distance_m,
            previous_distance_m: first.previous_distance_m,
            frequency_hz: first.frequency_hz,
        })
    }

    /// Arrivals still pending at `receiver`.
    pub fn pending(&self, receiver: TagId) -> usize {
        self.ledgers
            .get(receiver.index())
            .map(ReceptionLedger::len)
            .unwrap_or(0)
    }
}
