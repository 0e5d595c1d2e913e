//! Fixtures shared by the unit tests

use hal_abstractions::memory::Headroom;
use hal_abstractions::mock::{
    MockClock, MockDelay, MockEngine, MockHeadroom, MockTransport, SimTime, StepRng,
};

use crate::{SslClient, SslConfig};

pub type TestClient<const N: usize> =
    SslClient<MockTransport, MockEngine, MockClock, MockDelay, MockHeadroom, N>;

/// Server ciphertext the default mock engine needs to finish a handshake
pub const HANDSHAKE_FLIGHT: [u8; 48] = [0x16; 48];

pub fn new_client<const N: usize>() -> (TestClient<N>, SimTime) {
    let time = SimTime::new();
    let client = SslClient::new(
        MockTransport::new(),
        MockEngine::new(),
        MockClock::new(time.clone()),
        MockDelay::new(time.clone()),
        MockHeadroom::new(Headroom::Sufficient),
        SslConfig::default(),
    );
    (client, time)
}

/// Client with a completed handshake to `broker.emqx.io` and nothing written
pub fn connected_client<const N: usize>() -> (TestClient<N>, SimTime) {
    let (mut client, time) = new_client::<N>();
    client.transport_mut().push_incoming(&HANDSHAKE_FLIGHT);
    client
        .connect("broker.emqx.io", 8883, &mut StepRng::new(0))
        .unwrap();
    client.transport_mut().take_written();
    (client, time)
}
