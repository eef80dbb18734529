//! Multiplexer scenarios over real stream transports.
//!
//! Small chunk sizes force every write to be split across many frames; the
//! receiving side must reassemble the exact byte stream.

#[cfg(test)]
mod tests {
    use gensio::{sctp_available, Accepter, Gensio, StackConfig, TransferEngine};

    use crate::harness::{accept_connect, Scenario, TEST_STRING};

    async fn mux_pair(transport: &str, chunksize: usize) -> Option<(Accepter, Gensio, Gensio)> {
        let accepter = format!("mux(chunksize={}),{},127.0.0.1,0", chunksize, transport);
        let connector = format!("mux(chunksize={}),{},127.0.0.1,{{port}}", chunksize, transport);
        let scenario = match accept_connect(&accepter, &connector, &StackConfig::default(), false).await
        {
            Ok(scenario) => scenario,
            Err(e) if transport == "sctp" => {
                tracing::warn!(error = %e, "SCTP listener unavailable, skipping");
                return None;
            }
            Err(e) => panic!("{} scenario failed to start: {}", transport, e),
        };
        let Scenario {
            accepter,
            accepted,
            established,
        } = scenario;
        let server = accepted.unwrap();
        let client = established.unwrap().into_gensio().unwrap();
        Some((accepter, server, client))
    }

    async fn small_chunk_echo(transport: &str) {
        crate::init_tracing();
        let Some((_accepter, mut server, mut client)) = mux_pair(transport, 64).await else {
            return;
        };
        assert_eq!(client.stages(), &["mux", transport]);

        let engine = TransferEngine::default();
        let echo = tokio::spawn(async move { engine.echo(&mut server).await });
        engine.loopback(&mut client, TEST_STRING).await.unwrap();
        client.close_write().await.unwrap();
        assert_eq!(echo.await.unwrap().unwrap(), TEST_STRING.len() as u64);
    }

    #[tokio::test]
    async fn test_mux_small_tcp() {
        small_chunk_echo("tcp").await;
    }

    #[tokio::test]
    async fn test_mux_small_sctp() {
        if !sctp_available() {
            return;
        }
        small_chunk_echo("sctp").await;
    }

    #[tokio::test]
    async fn test_mux_one_byte_chunks() {
        let (_accepter, mut server, mut client) = mux_pair("tcp", 1).await.unwrap();
        let report = TransferEngine::default()
            .roundtrip(&mut client, &mut server, TEST_STRING)
            .await
            .unwrap();
        assert_eq!(report.bytes, 2 * TEST_STRING.len() as u64);

        let session = client.mux_session().unwrap();
        assert_eq!(session.params().chunksize, 1);
        // One SYN plus at least one frame per payload byte.
        assert!(session.frames_sent() > TEST_STRING.len() as u64);
    }

    #[tokio::test]
    async fn test_mux_second_channel_is_independent() {
        let (accepter, mut server, mut client) = mux_pair("tcp", 64).await.unwrap();

        let (second_client, second_server) =
            tokio::join!(client.open_channel(), accepter.accept());
        let mut second_client = second_client.unwrap();
        let mut second_server = second_server.unwrap();
        assert!(std::sync::Arc::ptr_eq(
            client.mux_session().unwrap(),
            second_client.mux_session().unwrap()
        ));

        let engine = TransferEngine::default();
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 199) as u8).collect();
        engine
            .oneway(&mut second_client, &mut second_server, &payload)
            .await
            .unwrap();
        engine
            .oneway(&mut server, &mut client, TEST_STRING)
            .await
            .unwrap();
        assert_eq!(client.mux_session().unwrap().channel_count(), 2);

        second_client.close().await.unwrap();
        engine
            .oneway(&mut client, &mut server, TEST_STRING)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_mux_server_opens_channel() {
        let (_accepter, server, client) = mux_pair("tcp", 64).await.unwrap();

        let (from_server, at_client) = tokio::join!(server.open_channel(), client.accept_channel());
        let mut from_server = from_server.unwrap();
        let mut at_client = at_client.unwrap();
        TransferEngine::default()
            .roundtrip(&mut from_server, &mut at_client, TEST_STRING)
            .await
            .unwrap();
    }
}
