//! Time-ordered event queue and simulation clock.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tagsim_common::{
    Event, EventId, EventPayload, EventSource, MachineKind, SimError, SimTime, TagId,
};
use tracing::debug;

/// Heap entry. Equal times pop in insertion order.
struct QueuedEvent {
    seq: u64,
    event: Event,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest time, then lowest seq, first)
        other
            .event
            .time
            .cmp(&self.event.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Pending events plus the clock they drive.
///
/// The clock only moves when an event is popped, and nothing may be
/// scheduled before it.
#[derive(Default)]
pub struct EventQueue {
    heap: BinaryHeap<QueuedEvent>,
    next_seq: u64,
    now: SimTime,
}

impl EventQueue {
    /// Create an empty queue with the clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current simulation time.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether no events are pending.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// The next event to be popped.
    pub fn peek(&self) -> Option<&Event> {
        self.heap.peek().map(|q| &q.event)
    }

    /// Insert an event firing at `time`.
    ///
    /// Fails with [`SimError::Causality`] if `time` is before the clock.
    /// Returns a copy of the stored event.
    pub fn schedule(
        &mut self,
        time: SimTime,
        tag: TagId,
        machine: Option<MachineKind>,
        source: EventSource,
        payload: EventPayload,
    ) -> Result<Event, SimError> {
        if time < self.now {
            return Err(SimError::Causality {
                now: self.now,
                requested_s: time.as_secs_f64(),
            });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let event = Event {
            id: EventId(seq),
            time,
            tag,
            machine,
            source,
            payload,
        };
        debug!(
            id = seq,
            %time,
            %tag,
            kind = event.payload.kind_name(),
            "event scheduled"
        );
        self.heap.push(QueuedEvent {
            seq,
            event: event.clone(),
        });
        Ok(event)
    }

    /// Insert an event `delay_s` seconds after the clock.
    ///
    /// Negative or non-finite delays are causality violations.
    pub fn schedule_after(
        &mut self,
        delay_s: f64,
        tag: TagId,
        machine: Option<MachineKind>,
        source: EventSource,
        payload: EventPayload,
    ) -> Result<Event, SimError> {
        let delay = SimTime::from_secs_f64(delay_s).ok_or(SimError::Causality {
            now: self.now,
            requested_s: self.now.as_secs_f64() + delay_s,
        })?;
        self.schedule(self.now + delay, tag, machine, source, payload)
    }

    /// Remove the earliest event and advance the clock to it.
    pub fn pop(&mut self) -> Option<Event> {
        let queued = self.heap.pop()?;
        self.now = queued.event.time;
        Some(queued.event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(queue: &mut EventQueue, nanos: u64, timer_id: u32) -> Result<Event, SimError> {
        queue.schedule(
            SimTime::from_nanos(nanos),
            TagId::new(0),
            Some(MachineKind::Input),
            EventSource::Seed,
            EventPayload::Timer { timer_id },
        )
    }

    fn timer_id(event: &Event) -> u32 {
        match event.payload {
            EventPayload::Timer { timer_id } => timer_id,
            _ => panic!("not a timer"),
        }
    }

    #[test]
    fn test_pops_in_time_then_insertion_order() {
        let mut queue = EventQueue::new();
        push(&mut queue, 30, 0).unwrap();
        push(&mut queue, 10, 1).unwrap();
        push(&mut queue, 10, 2).unwrap();
        push(&mut queue, 20, 3).unwrap();
        push(&mut queue, 10, 4).unwrap();

        let order: Vec<u32> = std::iter::from_fn(|| queue.pop()).map(|e| timer_id(&e)).collect();
        assert_eq!(order, vec![1, 2, 4, 3, 0]);
        assert_eq!(queue.now(), SimTime::from_nanos(30));
    }

    #[test]
    fn test_clock_advances_on_pop() {
        let mut queue = EventQueue::new();
        push(&mut queue, 50, 0).unwrap();
        assert_eq!(queue.now(), SimTime::ZERO);
        assert_eq!(queue.peek().map(|e| e.time), Some(SimTime::from_nanos(50)));
        queue.pop();
        assert_eq!(queue.now(), SimTime::from_nanos(50));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_rejects_past_events() {
        let mut queue = EventQueue::new();
        push(&mut queue, 100, 0).unwrap();
        queue.pop();

        // Same instant is allowed.
        assert!(push(&mut queue, 100, 1).is_ok());
        match push(&mut queue, 99, 2) {
            Err(SimError::Causality { now, .. }) => assert_eq!(now, SimTime::from_nanos(100)),
            other => panic!("expected causality error, got {:?}", other),
        }
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_schedule_after() {
        let mut queue = EventQueue::new();
        push(&mut queue, 1_000, 0).unwrap();
        queue.pop();

        let event = queue
            .schedule_after(2e-6, TagId::new(1), None, EventSource::Script, EventPayload::Init)
            .unwrap();
        assert_eq!(event.time, SimTime::from_nanos(3_000));

        let err = queue
            .schedule_after(-1e-6, TagId::new(1), None, EventSource::Script, EventPayload::Init)
            .unwrap_err();
        assert!(matches!(err, SimError::Causality { .. }));
        assert!(queue
            .schedule_after(f64::NAN, TagId::new(1), None, EventSource::Script, EventPayload::Init)
            .is_err());
    }

    #[test]
    fn test_event_ids_unique() {
        let mut queue = EventQueue::new();
        let a = push(&mut queue, 5, 0).unwrap();
        let b = push(&mut queue, 5, 1).unwrap();
        assert_ne!(a.id, b.id);
    }
}
