//! Process-wide map from BackendKeyData pairs to the cancel flag of the owning session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::debug;

static NEXT_PROCESS_ID: AtomicI32 = AtomicI32::new(1);

static SESSIONS: Lazy<RwLock<HashMap<(i32, i32), Arc<AtomicBool>>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Registration of one session; dropping it removes the entry.
#[derive(Debug)]
pub struct CancelHandle {
    process_id: i32,
    secret_key: i32,
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn register() -> CancelHandle {
        let process_id = NEXT_PROCESS_ID.fetch_add(1, Ordering::Relaxed);
        let secret_key = (uuid::Uuid::new_v4().as_u128() as u32 & 0x7fff_ffff) as i32;
        let flag = Arc::new(AtomicBool::new(false));
        SESSIONS.write().insert((process_id, secret_key), flag.clone());
        CancelHandle { process_id, secret_key, flag }
    }

    pub fn process_id(&self) -> i32 { self.process_id }

    pub fn secret_key(&self) -> i32 { self.secret_key }

    pub fn flag(&self) -> Arc<AtomicBool> { self.flag.clone() }
}

impl Drop for CancelHandle {
    fn drop(&mut self) { SESSIONS.write().remove(&(self.process_id, self.secret_key)); }
}

/// Raise the cancel flag of the matching session. Unknown pairs are ignored and return false.
pub fn request_cancel(process_id: i32, secret_key: i32) -> bool {
    match SESSIONS.read().get(&(process_id, secret_key)) {
        Some(flag) => {
            flag.store(true, Ordering::SeqCst);
            debug!(target: "pgwire", "cancel requested for pid={}", process_id);
            true
        }
        None => {
            debug!(target: "pgwire", "cancel request for unknown pid={} ignored", process_id);
            false
        }
    }
}
