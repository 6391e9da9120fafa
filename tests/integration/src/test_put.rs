//! Upload tests against the in-process stub.

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use http::header::{HeaderMap, HeaderName, HeaderValue};
    use penstock_core::{Config, Error, client_with_timeout};

    use crate::stub::StubS3;
    use crate::{patterned, read_to_end, stub_bucket, stub_config};

    const MIB: u64 = 1024 * 1024;

    fn good_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-amz-server-side-encryption"),
            HeaderValue::from_static("AES256"),
        );
        headers.insert(
            HeaderName::from_static("x-amz-meta-foometadata"),
            HeaderValue::from_static("testmeta"),
        );
        headers
    }

    #[tokio::test]
    async fn test_should_round_trip_small_object() {
        let stub = StubS3::start().await;
        let bucket = stub_bucket(&stub, stub_config());

        let mut writer = bucket.put_writer("testfile", None, None).expect("writer");
        let n = writer.write(b"test_data").await.expect("write");
        assert_eq!(n, 9);
        writer.close().await.expect("close");

        let (mut reader, _headers) = bucket.get_reader("testfile", None).await.expect("reader");
        let data = read_to_end(&mut reader).await.expect("read");
        reader.close().await.expect("close reader");
        assert_eq!(data, b"test_data");
    }

    #[tokio::test]
    async fn test_should_fail_empty_upload_without_initiating() {
        let stub = StubS3::start().await;
        let bucket = stub_bucket(&stub, stub_config());

        let mut writer = bucket.put_writer("testempty", None, None).expect("writer");
        assert_eq!(writer.write(b"").await.expect("empty write"), 0);

        let err = writer.close().await.expect_err("empty close");
        assert!(matches!(err, Error::EmptyUpload));
        assert!(err.to_string().contains("0 bytes written"));
        // No multipart session was ever started on the server.
        assert_eq!(stub.state.initiates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_should_forward_initiate_headers_to_server() {
        let stub = StubS3::start().await;
        let bucket = stub_bucket(&stub, stub_config());

        let mut writer = bucket
            .put_writer("testhg", Some(good_headers()), None)
            .expect("writer");
        writer.write(b"foo").await.expect("write");
        writer.close().await.expect("close");

        let (_, headers) = bucket.get_reader("testhg", None).await.expect("reader");
        assert_eq!(
            headers
                .get("x-amz-meta-foometadata")
                .and_then(|v| v.to_str().ok()),
            Some("testmeta")
        );
    }

    #[tokio::test]
    async fn test_should_reject_bad_sse_header() {
        let stub = StubS3::start().await;
        let bucket = stub_bucket(&stub, stub_config());

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-amz-server-side-encryption"),
            HeaderValue::from_static("AES512"),
        );
        let mut writer = bucket
            .put_writer("testhb", Some(headers), None)
            .expect("writer");

        let err = writer.write(b"foo").await.expect_err("bad sse");
        match &err {
            Error::Resp(resp) => {
                assert_eq!(resp.status_code, 400);
                assert!(resp.message.contains("AES256"), "message: {}", resp.message);
            }
            other => panic!("expected RespError, got {other:?}"),
        }
        // The stored error is what close surfaces too.
        assert!(writer.close().await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_should_upload_three_parts_for_11_mib() {
        let stub = StubS3::start().await;
        let config = Config {
            concurrency: 3,
            part_size: 5 * MIB,
            ..stub_config()
        };
        let bucket = stub_bucket(&stub, config);

        let data = patterned(11 * MIB as usize);
        let mut writer = bucket.put_writer("11mb_test.test", None, None).expect("writer");
        for chunk in data.chunks(MIB as usize) {
            writer.write(chunk).await.expect("write chunk");
        }
        writer.close().await.expect("close");

        let stored = stub.state.object("/stub/11mb_test.test").expect("stored object");
        assert_eq!(stored.data.len(), data.len());
        assert_eq!(&stored.data[..], &data[..]);
        // 5 + 5 + 1 MiB: the composite ETag carries the part count.
        assert!(stored.etag.ends_with("-3\""), "etag: {}", stored.etag);

        // Round-trip through the parallel reader at a smaller part size.
        let read_config = Config {
            concurrency: 4,
            part_size: MIB,
            ..stub_config()
        };
        let (mut reader, _) = bucket
            .get_reader("11mb_test.test", Some(read_config))
            .await
            .expect("reader");
        let roundtrip = read_to_end(&mut reader).await.expect("read");
        reader.close().await.expect("close reader");
        assert_eq!(roundtrip, data);
    }

    #[tokio::test]
    async fn test_should_retry_transient_part_failure() {
        let stub = StubS3::start().await;
        stub.state.fail_part_puts.lock().push_back(500);
        let config = Config {
            concurrency: 1,
            n_try: 3,
            ..stub_config()
        };
        let bucket = stub_bucket(&stub, config);

        let mut writer = bucket.put_writer("flaky", None, None).expect("writer");
        writer.write(b"survives one 500").await.expect("write");
        writer.close().await.expect("close despite transient failure");

        let stored = stub.state.object("/stub/flaky").expect("stored object");
        assert_eq!(&stored.data[..], b"survives one 500");
    }

    #[tokio::test]
    async fn test_should_abort_after_part_retries_exhausted() {
        let stub = StubS3::start().await;
        stub.state
            .fail_part_puts
            .lock()
            .extend([503, 503, 503, 503]);
        let config = Config {
            concurrency: 1,
            n_try: 2,
            part_size: 5 * MIB,
            ..stub_config()
        };
        let bucket = stub_bucket(&stub, config);

        let data = patterned(5 * MIB as usize);
        let mut writer = bucket.put_writer("doomed", None, None).expect("writer");
        writer.write(&data).await.expect("write fills exactly one part");

        let err = writer.close().await.expect_err("close");
        match &err {
            Error::Resp(resp) => assert_eq!(resp.status_code, 503),
            other => panic!("expected RespError, got {other:?}"),
        }
        assert_eq!(stub.state.aborts.lock().len(), 1);
        assert!(stub.state.object("/stub/doomed").is_none());

        // The error is sticky across subsequent writes.
        assert!(writer.write(b"more").await.is_err());
    }

    #[tokio::test]
    async fn test_should_treat_error_body_in_200_complete_as_failure() {
        let stub = StubS3::start().await;
        *stub.state.error_on_complete.lock() = true;
        let bucket = stub_bucket(&stub, stub_config());

        let mut writer = bucket.put_writer("badcomplete", None, None).expect("writer");
        writer.write(b"foo").await.expect("write");

        let err = writer.close().await.expect_err("close");
        match &err {
            Error::Resp(resp) => {
                assert_eq!(resp.code, "InternalError");
                assert!(resp.message.contains("internal error"));
            }
            other => panic!("expected RespError, got {other:?}"),
        }
        assert_eq!(stub.state.aborts.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_should_surface_timeout_and_abort() {
        let stub = StubS3::start().await;
        *stub.state.slow_part_puts.lock() = Some(Duration::from_secs(2));
        let config = Config {
            concurrency: 1,
            n_try: 1,
            part_size: 5 * MIB,
            md5_check: false,
            client: client_with_timeout(Duration::from_millis(100)),
            ..stub_config()
        };
        let bucket = stub_bucket(&stub, config);

        let data = patterned(5 * MIB as usize);
        let mut writer = bucket.put_writer("timeout.test1", None, None).expect("writer");
        writer.write(&data).await.expect("write");

        let err = writer.close().await.expect_err("close");
        match &err {
            Error::Transport(message) => {
                assert!(message.contains("timeout"), "message: {message}");
            }
            other => panic!("expected Transport, got {other:?}"),
        }
        // The abort itself is not slowed, so it lands.
        assert_eq!(stub.state.aborts.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_should_accept_zero_concurrency_config() {
        let stub = StubS3::start().await;
        let config = Config {
            concurrency: 0,
            n_try: 1,
            ..stub_config()
        };
        let bucket = stub_bucket(&stub, config);

        let mut writer = bucket.put_writer("noconc", None, None).expect("writer");
        writer.write(b"foo").await.expect("write");
        writer.close().await.expect("close");

        let stored = stub.state.object("/stub/noconc").expect("stored object");
        assert_eq!(&stored.data[..], b"foo");
    }
}
