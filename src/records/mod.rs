//! Structured records decoded from bootloader serial strings and flashing
//! tool output. Pure parsing, no I/O.

pub mod interface;
pub mod programmer;
pub mod serial;

pub use interface::{parse_interface_line, parse_interface_list, InterfaceInfo};
pub use programmer::{parse_programmer_info, ProgrammerInfo};
pub use serial::{parse_serial, SerialRecord};
