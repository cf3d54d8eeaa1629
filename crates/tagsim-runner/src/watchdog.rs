//! Watchdog thread for monitoring slow dispatches.
//!
//! The watchdog runs in a separate thread and watches the main event loop.
//! If one dispatch takes longer than the configured timeout (usually a
//! program looping close to its step cap, or a sink blocked on I/O), it
//! prints the event being processed so the run can be reproduced.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tagsim_common::{Event, EventPayload, EventSource, SimTime};

/// Information about the event being dispatched.
#[derive(Debug, Clone)]
pub struct CurrentEventInfo {
    /// Dispatch number within the run.
    pub event_number: u64,
    /// Event ID.
    pub event_id: u64,
    /// Simulation time of the event.
    pub sim_time: SimTime,
    /// Target tag index.
    pub tag: u32,
    /// Target machine, if any.
    pub machine: Option<String>,
    /// Producer of the event.
    pub source: String,
    /// Payload type name.
    pub event_type: &'static str,
    /// Extra payload details.
    pub details: String,
    /// When processing of this event started.
    pub started_at: Instant,
}

impl CurrentEventInfo {
    /// Create info from an event.
    pub fn from_event(event: &Event, event_number: u64) -> Self {
        CurrentEventInfo {
            event_number,
            event_id: event.id.0,
            sim_time: event.time,
            tag: event.tag.0,
            machine: event.machine.map(|m| m.to_string()),
            source: describe_source(&event.source),
            event_type: event.payload.kind_name(),
            details: describe_payload(&event.payload),
            started_at: Instant::now(),
        }
    }
}

fn describe_source(source: &EventSource) -> String {
    match source {
        EventSource::Seed => "seed".to_string(),
        EventSource::Script => "script".to_string(),
        EventSource::Machine { tag, machine } => format!("{}/{}", tag, machine),
        EventSource::Propagation { sender } => format!("signal from {}", sender),
    }
}

fn describe_payload(payload: &EventPayload) -> String {
    match payload {
        EventPayload::Init => String::new(),
        EventPayload::SignalArrival { arrival } => format!("arrival={}", arrival.0),
        EventPayload::Timer { timer_id } => format!("timer_id={}", timer_id),
        EventPayload::Message { from, value } => match from {
            Some(from) => format!("from={}, value={}", from, value),
            None => format!("injected, value={}", value),
        },
        EventPayload::Control(control) => control.to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared state between the main event loop and the watchdog thread.
pub struct WatchdogState {
    current_event: Mutex<Option<CurrentEventInfo>>,
    stop_flag: AtomicBool,
    tag_names: Mutex<HashMap<u32, String>>,
    alert_count: AtomicU64,
    seed: AtomicU64,
}

impl WatchdogState {
    /// Create a new watchdog state.
    pub fn new() -> Self {
        WatchdogState {
            current_event: Mutex::new(None),
            stop_flag: AtomicBool::new(false),
            tag_names: Mutex::new(HashMap::new()),
            alert_count: AtomicU64::new(0),
            seed: AtomicU64::new(0),
        }
    }

    /// Set the simulation seed for display in alerts.
    pub fn set_seed(&self, seed: u64) {
        self.seed.store(seed, Ordering::Relaxed);
    }

    /// Get the simulation seed.
    pub fn seed(&self) -> u64 {
        self.seed.load(Ordering::Relaxed)
    }

    /// Register tag names for alerts.
    pub fn register_tag_names<I>(&self, names: I)
    where
        I: IntoIterator<Item = (u32, String)>,
    {
        lock(&self.tag_names).extend(names);
    }

    /// Set the event being dispatched (`None` when idle).
    pub fn set_current_event(&self, info: Option<CurrentEventInfo>) {
        *lock(&self.current_event) = info;
    }

    /// The event being dispatched.
    pub fn current_event(&self) -> Option<CurrentEventInfo> {
        lock(&self.current_event).clone()
    }

    /// Signal the watchdog to stop.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }

    /// Check if the watchdog should stop.
    pub fn should_stop(&self) -> bool {
        self.stop_flag.load(Ordering::Relaxed)
    }

    /// Tag name by index.
    pub fn tag_name(&self, id: u32) -> String {
        lock(&self.tag_names)
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("tag:{}", id))
    }

    /// Increment and return the alert count.
    pub fn increment_alert_count(&self) -> u64 {
        self.alert_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Alerts fired so far.
    pub fn alert_count(&self) -> u64 {
        self.alert_count.load(Ordering::Relaxed)
    }
}

impl Default for WatchdogState {
    fn default() -> Self {
        Self::new()
    }
}

/// Watchdog thread handle.
pub struct Watchdog {
    state: Arc<WatchdogState>,
    thread_handle: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl Watchdog {
    /// Create and start a watchdog thread.
    pub fn new(timeout: Duration) -> Self {
        let state = Arc::new(WatchdogState::new());
        let watchdog_state = Arc::clone(&state);
        let check_interval = (timeout / 4).clamp(Duration::from_millis(10), Duration::from_millis(500));

        let thread_handle = thread::spawn(move || {
            let mut last_alerted_event: Option<u64> = None;

            while !watchdog_state.should_stop() {
                thread::sleep(check_interval);

                if let Some(event_info) = watchdog_state.current_event() {
                    let elapsed = event_info.started_at.elapsed();

                    // One alert per event
                    if elapsed >= timeout && last_alerted_event != Some(event_info.event_number) {
                        last_alerted_event = Some(event_info.event_number);
                        report(&watchdog_state, &event_info, elapsed);
                    }
                }
            }
        });

        Watchdog {
            state,
            thread_handle: Some(thread_handle),
            timeout,
        }
    }

    /// State for the main loop to update.
    pub fn state(&self) -> &Arc<WatchdogState> {
        &self.state
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Stop the watchdog thread and wait for it to finish.
    pub fn stop(mut self) {
        self.state.stop();
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.state.stop();
    }
}

fn report(state: &WatchdogState, event: &CurrentEventInfo, elapsed: Duration) {
    let alert_num = state.increment_alert_count();
    let target = match &event.machine {
        Some(machine) => format!("{}/{} (id={})", state.tag_name(event.tag), machine, event.tag),
        None => format!("{} (id={})", state.tag_name(event.tag), event.tag),
    };

    eprintln!();
    eprintln!("┏━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    eprintln!("┃ WATCHDOG ALERT #{}: dispatch taking too long ({:.1}s)", alert_num, elapsed.as_secs_f64());
    eprintln!("┣━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    eprintln!("┃ Event Number:  {}", event.event_number);
    eprintln!("┃ Event ID:      {}", event.event_id);
    eprintln!("┃ Event Type:    {}", event.event_type);
    eprintln!("┃ Sim Time:      {}", event.sim_time);
    eprintln!("┃ Target:        {}", target);
    eprintln!("┃ Source:        {}", event.source);
    if !event.details.is_empty() {
        eprintln!("┃ Details:       {}", event.details);
    }
    eprintln!("┣━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    eprintln!("┃ To reproduce, re-run with:");
    eprintln!("┃   --seed {} --max-events {}", state.seed(), event.event_number);
    eprintln!("┗━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    eprintln!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagsim_common::{EventId, MachineKind, TagId};

    fn timer_event() -> Event {
        Event {
            id: EventId(7),
            time: SimTime::from_micros(3),
            tag: TagId::new(1),
            machine: Some(MachineKind::Processing),
            source: EventSource::Machine {
                tag: TagId::new(1),
                machine: MachineKind::Processing,
            },
            payload: EventPayload::Timer { timer_id: 2 },
        }
    }

    #[test]
    fn test_event_info() {
        let info = CurrentEventInfo::from_event(&timer_event(), 12);
        assert_eq!(info.event_number, 12);
        assert_eq!(info.event_id, 7);
        assert_eq!(info.event_type, "timer");
        assert_eq!(info.details, "timer_id=2");
        assert_eq!(info.machine.as_deref(), Some("processing"));
        assert_eq!(info.source, "tag:1/processing");
    }

    #[test]
    fn test_tag_names() {
        let state = WatchdogState::new();
        state.register_tag_names([(0, "alice".to_string())]);
        assert_eq!(state.tag_name(0), "alice");
        assert_eq!(state.tag_name(5), "tag:5");
    }

    #[test]
    fn test_alerts_on_slow_event() {
        let watchdog = Watchdog::new(Duration::from_millis(20));
        let mut info = CurrentEventInfo::from_event(&timer_event(), 1);
        info.started_at = Instant::now() - Duration::from_secs(1);
        watchdog.state().set_current_event(Some(info));

        let deadline = Instant::now() + Duration::from_secs(5);
        while watchdog.state().alert_count() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(watchdog.state().alert_count(), 1);
        watchdog.stop();
    }
}
