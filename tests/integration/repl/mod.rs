mod live_apply;
mod parallel;
mod runtime;
