pub mod rate;
pub mod run;
pub mod template;
pub mod tol_seq;
