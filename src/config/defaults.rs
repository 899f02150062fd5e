// Window sizes and cooldowns were tuned empirically against real sessions; they
// are exposed as flags rather than treated as invariants.
pub const DEFAULT_DISPLAY_TURNS: usize = 3;
pub const DEFAULT_CONTEXT_TURNS: usize = 10;
pub const DEFAULT_RETAINED_TURNS: usize = 200;
pub const DEFAULT_RESPONSE_DEDUP_WINDOW: usize = 3;

pub const DEFAULT_DISPATCH_COOLDOWN_MS: u64 = 2_000;
pub const DEFAULT_STALE_LOCK_MS: u64 = 5_000;
pub const DEFAULT_SPEAK_COOLDOWN_MS: u64 = 2_000;
pub const DEFAULT_SILENCE_TIMEOUT_MS: u64 = 3_000;

pub const DEFAULT_EXCHANGE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_EXCHANGE_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;

pub const DEFAULT_SPEECH_RATE: f32 = 1.0;
pub const DEFAULT_SPEECH_PITCH: f32 = 1.0;
pub const DEFAULT_SPEECH_VOLUME: f32 = 1.0;

pub(super) const MAX_CONTEXT_TURNS: usize = 100;
pub(super) const MAX_EXCHANGE_RETRIES: u32 = 10;
pub(super) const MAX_EXCHANGE_TIMEOUT_MS: u64 = 300_000;
pub(super) const MAX_COOLDOWN_MS: u64 = 60_000;
pub(super) const FORBIDDEN_COMMAND_CHARS: &[char] = &['\0', '\n', '\r'];
