//! The lock used for the frame table, every supplemental page table, the swap
//! bookkeeping and each physical frame.
//!
//! With the default `ticket_mutex` feature waiters are served first-in
//! first-out, so a thread faulting under memory pressure cannot be starved by
//! others repeatedly grabbing the frame table.

#[cfg(feature = "ticket_mutex")]
pub type Mutex<T> = spin::mutex::TicketMutex<T>;
#[cfg(feature = "ticket_mutex")]
pub type MutexGuard<'a, T> = spin::mutex::TicketMutexGuard<'a, T>;

#[cfg(not(feature = "ticket_mutex"))]
pub type Mutex<T> = spin::mutex::SpinMutex<T>;
#[cfg(not(feature = "ticket_mutex"))]
pub type MutexGuard<'a, T> = spin::mutex::SpinMutexGuard<'a, T>;
