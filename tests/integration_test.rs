mod cas_write;
mod commons;
mod watch_list;
