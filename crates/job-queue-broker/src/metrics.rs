use job_queue_core::{JobStatus, QueueStats};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

/// Prometheus metrics for the job queue
pub struct QueueMetrics {
    pub registry: Registry,

    // Lifecycle events by outcome and type
    pub jobs_total: IntCounterVec,

    // Current job counts by status
    pub jobs: IntGaugeVec,

    // Attempt duration, claim to outcome
    pub job_duration: HistogramVec,

    pub workers_busy: IntGauge,
}

impl QueueMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let jobs_total = IntCounterVec::new(
            Opts::new("jq_jobs_total", "Job lifecycle events by status and type"),
            &["status", "job_type"],
        )?;
        registry.register(Box::new(jobs_total.clone()))?;

        let jobs = IntGaugeVec::new(
            Opts::new("jq_jobs", "Number of stored jobs by status"),
            &["status"],
        )?;
        registry.register(Box::new(jobs.clone()))?;

        let job_duration = HistogramVec::new(
            HistogramOpts::new(
                "jq_job_duration_seconds",
                "Duration of one job attempt in seconds",
            ),
            &["job_type"],
        )?;
        registry.register(Box::new(job_duration.clone()))?;

        let workers_busy = IntGauge::new("jq_workers_busy", "Workers currently executing a job")?;
        registry.register(Box::new(workers_busy.clone()))?;

        Ok(QueueMetrics {
            registry,
            jobs_total,
            jobs,
            job_duration,
            workers_busy,
        })
    }

    pub fn inc_jobs_total(&self, status: &str, job_type: &str) {
        self.jobs_total.with_label_values(&[status, job_type]).inc();
    }

    pub fn observe_duration(&self, job_type: &str, duration_secs: f64) {
        self.job_duration
            .with_label_values(&[job_type])
            .observe(duration_secs);
    }

    pub fn update_job_gauges(&self, stats: &QueueStats) {
        for status in JobStatus::ALL {
            self.jobs
                .with_label_values(&[status.as_str()])
                .set(stats.get(status) as i64);
        }
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
