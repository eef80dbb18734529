//! Echo loopback scenarios: whatever is written comes straight back.

#[cfg(test)]
mod tests {
    use gensio::{Connector, GensioState, ReadOutcome, StackConfig, TransferEngine};

    use crate::harness::TEST_STRING;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    #[tokio::test]
    async fn test_echo_loopback() {
        crate::init_tracing();
        let connector = Connector::new("echo", StackConfig::default()).unwrap();
        let mut io = connector.establish().await.unwrap().into_gensio().unwrap();
        assert_eq!(io.raddr(), "echo");
        assert_eq!(io.stages(), &["echo"]);

        let report = TransferEngine::default()
            .loopback(&mut io, TEST_STRING)
            .await
            .unwrap();
        assert_eq!(report.bytes, TEST_STRING.len() as u64);
    }

    #[tokio::test]
    async fn test_echo_large_payload() {
        let mut io = Connector::new("echo", StackConfig::default())
            .unwrap()
            .connect()
            .await
            .unwrap();
        let payload = pattern(256 * 1024);
        let report = TransferEngine::default()
            .loopback(&mut io, &payload)
            .await
            .unwrap();
        assert_eq!(report.bytes, payload.len() as u64);
        assert!(report.reads > 1);
    }

    #[tokio::test]
    async fn test_echo_msgdelim_keeps_boundaries() {
        let mut io = Connector::new("msgdelim,echo", StackConfig::default())
            .unwrap()
            .connect()
            .await
            .unwrap();
        assert!(io.is_packet());
        io.write(b"first").await.unwrap();
        io.write(b"second message").await.unwrap();
        assert_eq!(io.read(64).await.unwrap(), ReadOutcome::Data("first".into()));
        assert_eq!(
            io.read(64).await.unwrap(),
            ReadOutcome::Data("second message".into())
        );
    }

    #[tokio::test]
    async fn test_echo_close_write_then_eof() {
        let mut io = Connector::new("echo", StackConfig::default())
            .unwrap()
            .connect()
            .await
            .unwrap();
        io.write(TEST_STRING).await.unwrap();
        io.close_write().await.unwrap();
        assert_eq!(io.state(), GensioState::HalfClosed);

        let mut got = Vec::new();
        while let Some(data) = io.read(5).await.unwrap().into_data() {
            got.extend_from_slice(&data);
        }
        assert_eq!(got, TEST_STRING);
        io.close().await.unwrap();
    }
}
