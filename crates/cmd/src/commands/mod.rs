// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

pub mod cat;
pub mod copy;
pub mod describe;
pub mod init;
pub mod list;
pub mod mkdir;
pub mod mv;
pub mod query;
pub mod remove;
pub mod rename;

pub use cat::{CatOptions, cat_command};
pub use copy::copy_command;
pub use describe::describe_command;
pub use init::init_command;
pub use list::list_command;
pub use mkdir::mkdir_command;
pub use mv::move_command;
pub use query::{QueryOptions, parse_binding, query_command};
pub use remove::remove_command;
pub use rename::rename_command;
