pub mod comp_frame;
pub mod pipeline_events;
pub mod frame_ingest;
pub mod double_buffer;
pub mod equalizer;
pub mod demodulator;
pub mod phy_stats;
pub mod comp_processor;
