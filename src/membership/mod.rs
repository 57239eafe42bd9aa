pub mod membership_guard;

pub use membership_guard::MembershipGuard;
