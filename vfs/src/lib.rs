#![no_std]

extern crate alloc;

mod dirent;
mod error;
mod fs;
mod stat;

pub use self::{
    dirent::{DirEntry, DirEntryType},
    error::Error,
    fs::{Credentials, FileSystem},
    stat::Stat,
};
