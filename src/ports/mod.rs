pub mod clock;
pub mod codec;
pub mod cron;
pub mod driver;

pub use clock::{Clock, FakeClock, SystemClock};
pub use codec::{Codec, RawCodec};
pub use driver::{Driver, DriverCommand, HostOffer, QueuedDriver, StatusUpdate, TaskDescription};
pub use self::cron::{CronCallback, CronEngine, CronScheduler};
