pub mod appsettings;
pub mod clock;
pub mod delivery;
pub mod destination;
pub mod recurrence;
pub mod reminder;
pub mod scheduling;
pub mod storage;
pub mod telegram;

#[cfg(test)]
mod test_utils;
