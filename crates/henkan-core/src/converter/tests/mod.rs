mod basic;
mod prediction;
mod search;
