mod helpers;
mod key;
mod records;

pub(crate) use key::cmd_key_new;
pub(crate) use records::{NewPurchase, cmd_add, cmd_delete, cmd_search};
