//! Integration tests: the full round loop against in-memory desktop and
//! classifier fakes, on tokio's paused clock.

mod mock_desktop;
mod round_loop;
