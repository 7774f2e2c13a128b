pub(crate) mod access_lists;
pub(crate) mod members;
pub(crate) mod ranks;
pub(crate) mod role_ranks;
pub(crate) mod roles;
pub(crate) mod visibility;
