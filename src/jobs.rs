use std::{
  collections::HashMap,
  sync::{Arc, RwLock},
  time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
  Queued,
  Running,
  Done,
  Error,
}

impl JobStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, JobStatus::Done | JobStatus::Error)
  }
}

/// Snapshot of one download request. The registry hands out clones, the
/// live record only changes under the registry's write lock.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
  pub id: String,
  pub created_at: DateTime<Utc>,
  pub status: JobStatus,
  // 0..=100
  pub percent: f64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub file_name: Option<String>,
  #[serde(rename = "error", skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl Job {
  fn new(id: String) -> Self {
    Self {
      id,
      created_at: Utc::now(),
      status: JobStatus::Queued,
      percent: 0.0,
      file_name: None,
      error: None,
    }
  }

  fn start(&mut self) {
    if self.status == JobStatus::Queued {
      self.status = JobStatus::Running;
      self.percent = 0.0;
    }
  }

  fn advance(&mut self, percent: f64) {
    if self.status == JobStatus::Running {
      self.percent = self.percent.max(percent);
    }
  }

  fn finish(&mut self, file_name: String) {
    if !self.status.is_terminal() {
      self.status = JobStatus::Done;
      self.percent = 100.0;
      self.file_name = Some(file_name);
    }
  }

  fn fail(&mut self, message: String) {
    if !self.status.is_terminal() {
      self.status = JobStatus::Error;
      self.error = Some(message);
    }
  }
}

/// `done / total` as a percentage in `0..=100`, or `None` when the total is
/// unknown.
pub fn percent(done: f64, total: f64) -> Option<f64> {
  if !total.is_finite() || total <= 0.0 || !done.is_finite() {
    return None;
  }
  Some((done / total * 100.0).clamp(0.0, 100.0))
}

#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
  jobs: Arc<RwLock<HashMap<String, Job>>>,
}

impl JobRegistry {
  /// Registers a queued job and returns its id.
  pub fn create(&self) -> String {
    let id = new_id();
    self
      .jobs
      .write()
      .unwrap()
      .insert(id.clone(), Job::new(id.clone()));
    id
  }

  pub fn get(&self, id: &str) -> Option<Job> {
    self.jobs.read().unwrap().get(id).cloned()
  }

  pub fn len(&self) -> usize {
    self.jobs.read().unwrap().len()
  }

  pub fn start(&self, id: &str) {
    self.update(id, Job::start);
  }

  /// Ignored unless the job is running and `total` is known.
  pub fn report_progress(&self, id: &str, done: f64, total: f64) {
    if let Some(percent) = percent(done, total) {
      self.update(id, |job| job.advance(percent));
    }
  }

  pub fn finish(&self, id: &str, file_name: impl Into<String>) {
    let file_name = file_name.into();
    self.update(id, |job| job.finish(file_name));
  }

  pub fn fail(&self, id: &str, message: impl Into<String>) {
    let message = message.into();
    self.update(id, |job| job.fail(message));
  }

  /// Drops finished and failed jobs created more than `older_than` ago.
  /// Jobs still queued or running are kept whatever their age.
  pub fn evict_finished(&self, older_than: Duration) -> usize {
    let now = Utc::now();
    let expired = |job: &Job| {
      job.status.is_terminal()
        && (now - job.created_at)
          .to_std()
          .map_or(false, |age| age >= older_than)
    };

    let mut jobs = self.jobs.write().unwrap();
    let before = jobs.len();
    jobs.retain(|_, job| !expired(job));
    before - jobs.len()
  }

  // the only place a job is mutated
  fn update(&self, id: &str, f: impl FnOnce(&mut Job)) -> bool {
    match self.jobs.write().unwrap().get_mut(id) {
      Some(job) => {
        f(job);
        true
      }
      None => {
        debug!(id, "update for unknown job");
        false
      }
    }
  }
}

fn new_id() -> String {
  rand::random::<[u8; 16]>()
    .iter()
    .map(|b| format!("{b:02x}"))
    .collect()
}
