pub type CmdResult<T> = elvard::Result<(T, i32)>;

pub mod list;
pub mod run;
