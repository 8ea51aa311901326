pub mod mixer;
pub mod negotiator;
pub mod pcm_output;
pub mod probe;
pub mod write_loop;
