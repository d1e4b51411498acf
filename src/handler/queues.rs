use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{Duration, Utc};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::handler::job::{Job, JobResult, JobWrapper};

/// The three in-memory collections a handler moves jobs through, plus the
/// two edge-triggered signals the control loop waits on.
///
/// Lock ordering: `pending` may be held while touching `available` or
/// `finished`; the reverse never happens.
#[derive(Debug, Default)]
pub(crate) struct JobQueues {
    available: Mutex<VecDeque<JobWrapper>>,
    pending: Mutex<HashMap<Uuid, JobWrapper>>,
    finished: Mutex<VecDeque<JobWrapper>>,
    /// Raised when a lease empties the available queue.
    pub(crate) available_drained: Notify,
    /// Raised when a wrapper enters the finished queue.
    pub(crate) result_ready: Notify,
}

/// What `settle` decided about a submitted result, under the pending lock.
#[derive(Debug)]
pub(crate) enum Settlement {
    /// No pending wrapper with that job id.
    Unknown,
    /// The submitting client is not the assignee. The wrapper is untouched.
    ClientMismatch { assigned: Option<Uuid> },
    /// Error result: wrapper reset and re-queued into available.
    Retried { retry_count: u32 },
    /// Error result past the retry bound: wrapper dropped.
    DeadLettered { retry_count: u32 },
    /// Success: wrapper moved to finished.
    Completed,
}

impl JobQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_available(&self, wrapper: JobWrapper) {
        self.available
            .lock()
            .expect("available lock poisoned")
            .push_back(wrapper);
    }

    pub fn available_is_empty(&self) -> bool {
        self.available
            .lock()
            .expect("available lock poisoned")
            .is_empty()
    }

    pub fn available_len(&self) -> usize {
        self.available.lock().expect("available lock poisoned").len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().expect("pending lock poisoned").len()
    }

    pub fn finished_len(&self) -> usize {
        self.finished.lock().expect("finished lock poisoned").len()
    }

    /// Move the oldest available wrapper to pending, stamped with the
    /// assignee. Returns the client-facing projection, or `None` when the
    /// available queue is empty.
    pub fn lease(&self, client_id: Uuid) -> Option<Job> {
        let (mut wrapper, drained) = {
            let mut available = self.available.lock().expect("available lock poisoned");
            let wrapper = available.pop_front()?;
            (wrapper, available.is_empty())
        };

        wrapper.assigned_time = Some(Utc::now());
        wrapper.assigned_client_id = Some(client_id);
        let job = wrapper.projection();

        self.pending
            .lock()
            .expect("pending lock poisoned")
            .insert(wrapper.job_id, wrapper);

        if drained {
            self.available_drained.notify_one();
        }
        Some(job)
    }

    /// Apply a submitted result to its pending wrapper. The whole decision
    /// runs under the pending lock so it serializes with the timeout sweep
    /// and the stop wipe.
    pub fn settle(&self, result: &JobResult, max_retries: u32) -> Settlement {
        let mut pending = self.pending.lock().expect("pending lock poisoned");

        let assigned = match pending.get(&result.job_id) {
            Some(wrapper) => wrapper.assigned_client_id,
            None => return Settlement::Unknown,
        };
        if assigned != Some(result.client_id) {
            return Settlement::ClientMismatch { assigned };
        }

        let mut wrapper = pending
            .remove(&result.job_id)
            .expect("wrapper vanished under pending lock");

        if result.has_error() {
            wrapper.retry_count += 1;
            let retry_count = wrapper.retry_count;
            if max_retries > 0 && retry_count > max_retries {
                return Settlement::DeadLettered { retry_count };
            }
            wrapper.reset();
            self.available
                .lock()
                .expect("available lock poisoned")
                .push_back(wrapper);
            return Settlement::Retried { retry_count };
        }

        wrapper.result_time = Some(Utc::now());
        wrapper.result_payload = result.payload.clone();
        self.finished
            .lock()
            .expect("finished lock poisoned")
            .push_back(wrapper);
        self.result_ready.notify_one();
        Settlement::Completed
    }

    /// Move pending wrappers whose lease is older than `timeout` back to
    /// available, with cleared assignment. Returns the recycled job ids.
    pub fn recycle_expired(&self, timeout: Duration) -> Vec<Uuid> {
        let now = Utc::now();
        let mut pending = self.pending.lock().expect("pending lock poisoned");

        let expired: Vec<Uuid> = pending
            .values()
            .filter(|w| match w.assigned_time {
                Some(assigned) => now.signed_duration_since(assigned) > timeout,
                None => false,
            })
            .map(|w| w.job_id)
            .collect();

        if expired.is_empty() {
            return expired;
        }

        let mut available = self.available.lock().expect("available lock poisoned");
        for job_id in &expired {
            if let Some(mut wrapper) = pending.remove(job_id) {
                wrapper.reset();
                available.push_back(wrapper);
            }
        }
        expired
    }

    /// Pop the oldest finished wrapper, in insertion order.
    pub fn pop_finished(&self) -> Option<JobWrapper> {
        self.finished
            .lock()
            .expect("finished lock poisoned")
            .pop_front()
    }

    /// Empty all three queues. Takes the pending lock first so in-flight
    /// `settle` calls either complete against the old contents or observe
    /// the wiped map.
    pub fn wipe(&self) {
        let mut pending = self.pending.lock().expect("pending lock poisoned");
        pending.clear();
        self.available
            .lock()
            .expect("available lock poisoned")
            .clear();
        self.finished
            .lock()
            .expect("finished lock poisoned")
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrapper(input: &str) -> JobWrapper {
        JobWrapper::new(Uuid::new_v4(), input.to_string(), None)
    }

    #[test]
    fn lease_is_fifo_and_stamps_assignment() {
        let queues = JobQueues::new();
        queues.push_available(wrapper("first"));
        queues.push_available(wrapper("second"));

        let client = Uuid::new_v4();
        let job = queues.lease(client).unwrap();
        assert_eq!(job.input, "first");
        assert_eq!(queues.available_len(), 1);
        assert_eq!(queues.pending_len(), 1);
    }

    #[test]
    fn lease_on_empty_returns_none_without_touching_pending() {
        let queues = JobQueues::new();
        assert!(queues.lease(Uuid::new_v4()).is_none());
        assert_eq!(queues.pending_len(), 0);
    }

    #[test]
    fn settle_unknown_job() {
        let queues = JobQueues::new();
        let result = JobResult::success(Uuid::new_v4(), Uuid::new_v4(), "out");
        assert!(matches!(queues.settle(&result, 0), Settlement::Unknown));
    }

    #[test]
    fn settle_rejects_wrong_client_and_keeps_wrapper_pending() {
        let queues = JobQueues::new();
        queues.push_available(wrapper("job"));
        let owner = Uuid::new_v4();
        let job = queues.lease(owner).unwrap();

        let intruder = Uuid::new_v4();
        let result = JobResult::success(job.job_id, intruder, "out");
        match queues.settle(&result, 0) {
            Settlement::ClientMismatch { assigned } => assert_eq!(assigned, Some(owner)),
            other => panic!("unexpected settlement: {other:?}"),
        }
        assert_eq!(queues.pending_len(), 1);
        assert_eq!(queues.finished_len(), 0);
    }

    #[test]
    fn settle_error_requeues_with_cleared_assignment() {
        let queues = JobQueues::new();
        queues.push_available(wrapper("job"));
        let client = Uuid::new_v4();
        let job = queues.lease(client).unwrap();

        let result = JobResult::failure(job.job_id, client, "boom");
        assert!(matches!(
            queues.settle(&result, 0),
            Settlement::Retried { retry_count: 1 }
        ));
        assert_eq!(queues.pending_len(), 0);
        assert_eq!(queues.available_len(), 1);

        // The same job can be leased again by another client.
        let again = queues.lease(Uuid::new_v4()).unwrap();
        assert_eq!(again.job_id, job.job_id);
    }

    #[test]
    fn settle_dead_letters_past_the_retry_bound() {
        let queues = JobQueues::new();
        queues.push_available(wrapper("job"));
        let client = Uuid::new_v4();

        let job = queues.lease(client).unwrap();
        let failed = JobResult::failure(job.job_id, client, "boom");
        assert!(matches!(
            queues.settle(&failed, 1),
            Settlement::Retried { retry_count: 1 }
        ));

        let released = queues.lease(client).unwrap();
        assert_eq!(released.job_id, job.job_id);
        assert!(matches!(
            queues.settle(&failed, 1),
            Settlement::DeadLettered { retry_count: 2 }
        ));
        assert_eq!(queues.available_len(), 0);
        assert_eq!(queues.pending_len(), 0);
    }

    #[test]
    fn settle_success_moves_to_finished_in_order() {
        let queues = JobQueues::new();
        queues.push_available(wrapper("a"));
        queues.push_available(wrapper("b"));
        let client = Uuid::new_v4();

        let first = queues.lease(client).unwrap();
        let second = queues.lease(client).unwrap();
        queues.settle(&JobResult::success(first.job_id, client, "1"), 0);
        queues.settle(&JobResult::success(second.job_id, client, "2"), 0);

        let done = queues.pop_finished().unwrap();
        assert_eq!(done.job_id, first.job_id);
        assert_eq!(done.result_payload.as_deref(), Some("1"));
        assert!(done.result_time.is_some());
    }

    #[test]
    fn recycle_expired_honors_the_cutoff() {
        let queues = JobQueues::new();
        queues.push_available(wrapper("job"));
        let client = Uuid::new_v4();
        let job = queues.lease(client).unwrap();

        // A generous timeout recycles nothing.
        assert!(queues.recycle_expired(Duration::seconds(3600)).is_empty());
        assert_eq!(queues.pending_len(), 1);

        // A negative cutoff makes the fresh lease look expired.
        let recycled = queues.recycle_expired(Duration::seconds(-1));
        assert_eq!(recycled, vec![job.job_id]);
        assert_eq!(queues.pending_len(), 0);
        assert_eq!(queues.available_len(), 1);
    }

    #[test]
    fn wipe_clears_everything() {
        let queues = JobQueues::new();
        queues.push_available(wrapper("a"));
        queues.push_available(wrapper("b"));
        let client = Uuid::new_v4();
        let job = queues.lease(client).unwrap();
        queues.settle(&JobResult::success(job.job_id, client, "out"), 0);

        queues.wipe();
        assert_eq!(queues.available_len(), 0);
        assert_eq!(queues.pending_len(), 0);
        assert_eq!(queues.finished_len(), 0);
    }
}
