use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Sentinel payloads published on a latch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(i64)]
pub enum LatchMessage {
  /// The counter reached zero and its key was removed.
  Drained = 0,
  /// The counter was set from the absent state.
  Rearmed = 1,
}
