// Purpose - external interfaces, wire formats

pub mod midi;
