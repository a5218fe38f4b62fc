pub mod dump_ir;
pub mod run;
