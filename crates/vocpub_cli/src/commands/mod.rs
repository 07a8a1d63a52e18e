pub(crate) mod meta;
pub(crate) mod output;
pub(crate) mod publish;
pub(crate) mod serve;
pub(crate) mod shared;
pub(crate) mod targets;
