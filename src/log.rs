#![allow(unused, reason = "logger")]

macro_rules! info {
    ($($tt:tt)*) => {
        ::log::info!($($tt)*)
    };
}

macro_rules! debug {
    ($($tt:tt)*) => {
        ::log::debug!($($tt)*)
    };
}

macro_rules! warning {
    ($($tt:tt)*) => {
        ::log::warn!($($tt)*)
    };
}

macro_rules! error {
    ($($tt:tt)*) => {
        ::log::error!($($tt)*)
    };
}

pub(crate) use {debug, error, info, warning};
