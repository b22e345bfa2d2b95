mod gate;
mod promise;

pub use self::{gate::*, promise::*};
