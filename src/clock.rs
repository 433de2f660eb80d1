use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use chrono::{DateTime, Utc};
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use thiserror::Error;

/// 所有輪詢共用的固定間隔。
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

const SLEEP_SLICE: Duration = Duration::from_millis(200);

/// 等待期間收到結束訊號。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Interrupted by shutdown signal")]
pub struct Interrupted;

/// 取得目前時間與可中斷的等待。
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn sleep(&self, duration: Duration) -> Result<(), Interrupted>;
}

/// 使用系統時間的時鐘，SIGINT / SIGTERM 會中斷進行中的等待。
#[derive(Debug, Clone, Default)]
pub struct SystemClock {
    shutdown: Arc<AtomicBool>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// 註冊 SIGINT 與 SIGTERM，收到時設置結束旗標。
    pub fn with_signal_handlers() -> io::Result<Self> {
        let clock = Self::new();
        for signal in [SIGINT, SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&clock.shutdown))?;
        }
        Ok(clock)
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let mut remaining = duration;
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return Err(Interrupted);
            }
            if remaining.is_zero() {
                return Ok(());
            }
            let slice = remaining.min(SLEEP_SLICE);
            thread::sleep(slice);
            remaining -= slice;
        }
    }
}

/// 手動推進的時鐘，`sleep` 只會累加時間並記錄呼叫次數。
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
    interrupt_after: Option<usize>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
            sleeps: Mutex::new(Vec::new()),
            interrupt_after: None,
        }
    }

    /// 第 `count` 次之後的 `sleep` 都回傳 [`Interrupted`]。
    pub fn interrupt_after(mut self, count: usize) -> Self {
        self.interrupt_after = Some(count);
        self
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .map(|sleeps| sleeps.clone())
            .unwrap_or_default()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_else(|_| Utc::now())
    }

    fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let mut sleeps = self.sleeps.lock().map_err(|_| Interrupted)?;
        if self
            .interrupt_after
            .is_some_and(|limit| sleeps.len() >= limit)
        {
            return Err(Interrupted);
        }
        sleeps.push(duration);

        if let (Ok(mut now), Ok(step)) = (self.now.lock(), chrono::Duration::from_std(duration)) {
            *now += step;
        }
        Ok(())
    }
}
