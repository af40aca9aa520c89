pub mod stable;
