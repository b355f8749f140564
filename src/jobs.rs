use std::collections::VecDeque;

use log::{debug, info, warn};

use crate::ast::Job;
use crate::job_control::{self, PollOutcome};

/// Block until every process of `job` has exited, in pipeline order.
///
/// Exit statuses are logged, not returned; the caller discards the job.
pub fn wait_foreground(job: &mut Job) {
    for cmd in job.commands.iter_mut() {
        let Some(pid) = cmd.pid.take() else {
            continue;
        };
        match job_control::wait_for_pid(pid) {
            Ok(code) => debug!("pid {pid} ({}) exited with {code:?}", cmd.program()),
            Err(err) => warn!("waiting for pid {pid}: {err}"),
        }
        job.live = job.live.saturating_sub(1);
    }
}

/// Jobs running in the background, most recently started first.
#[derive(Default)]
pub struct JobTable {
    jobs: VecDeque<Job>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly launched background job.
    pub fn register(&mut self, job: Job) {
        debug!("background job with {} live process(es): {job}", job.live);
        self.jobs.push_front(job);
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs in display order (newest first).
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    /// Non-blocking sweep: collect every tracked process that has exited and
    /// drop jobs whose last process is gone. Returns how many jobs finished.
    ///
    /// Only pids recorded in the table are polled, so children owned by
    /// someone else (a foreground job, another `Shell`) are never consumed.
    pub fn reap(&mut self) -> usize {
        for job in self.jobs.iter_mut() {
            for cmd in job.commands.iter_mut() {
                let Some(pid) = cmd.pid else {
                    continue;
                };
                match job_control::poll_pid(pid) {
                    Ok(PollOutcome::Running) => continue,
                    Ok(PollOutcome::Exited(code)) => {
                        debug!("reaped pid {pid} ({}) with {code:?}", cmd.program());
                    }
                    Err(err) => warn!("lost track of pid {pid}: {err}"),
                }
                cmd.pid = None;
                job.live = job.live.saturating_sub(1);
            }
        }

        let before = self.jobs.len();
        self.jobs.retain(|job| {
            if job.live == 0 {
                debug!("background job finished: {job}");
            }
            job.live > 0
        });
        before - self.jobs.len()
    }

    /// Empty the table at shutdown, either waiting on each remaining job or
    /// leaving its processes to run on unsupervised.
    pub fn drain(&mut self, wait: bool) {
        self.reap();
        for mut job in self.jobs.drain(..) {
            if wait {
                wait_foreground(&mut job);
            } else {
                info!("leaving background job running: {job}");
            }
        }
    }
}
