//! Small internal helpers shared across the crate.

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Lock a mutex, recovering the inner data if a holder panicked.
///
/// None of the guarded state in this crate can be left logically torn by a
/// panic (every critical section either completes or the order it was
/// mutating is abandoned with the request), so poisoning is not treated as
/// fatal.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read-lock an `RwLock`, recovering from poisoning.
pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

/// Write-lock an `RwLock`, recovering from poisoning.
pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Nanoseconds since the Unix epoch for `t`, saturating at zero for
/// pre-epoch times and at `i64::MAX` far in the future.
pub(crate) fn nanos_since_epoch(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        Err(_) => 0,
    }
}

/// Inverse of [`nanos_since_epoch`].
pub(crate) fn time_from_nanos(nanos: i64) -> SystemTime {
    if nanos >= 0 {
        UNIX_EPOCH + Duration::from_nanos(nanos as u64)
    } else {
        UNIX_EPOCH - Duration::from_nanos(nanos.unsigned_abs())
    }
}

/// Best-effort SO_SNDBUF on the publisher's UDP socket.
pub(crate) fn set_send_buffer(socket: &std::net::UdpSocket, bytes: usize) {
    if let Err(e) = socket2::SockRef::from(socket).set_send_buffer_size(bytes) {
        tracing::warn!(bytes, error = %e, "unable to size send buffer");
    }
}

/// Best-effort SO_RCVBUF on the receiver's UDP socket.
pub(crate) fn set_recv_buffer(socket: &std::net::UdpSocket, bytes: usize) {
    if let Err(e) = socket2::SockRef::from(socket).set_recv_buffer_size(bytes) {
        tracing::warn!(bytes, error = %e, "unable to size receive buffer");
    }
}
