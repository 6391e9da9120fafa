//! Live tests against a real bucket.
//!
//! These require `TEST_BUCKET` plus credentials in the environment and
//! are `#[ignore]`d so they don't run during normal `cargo test`.

#[cfg(test)]
mod tests {
    use http::header::{HeaderMap, HeaderName, HeaderValue};
    use penstock_core::{Bucket, Config, Error};

    use crate::{live_bucket, patterned, read_to_end};

    const MIB: u64 = 1024 * 1024;

    fn bucket() -> Bucket {
        live_bucket().expect("TEST_BUCKET must be set in environment")
    }

    fn sse_headers() -> HeaderMap {
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

    async fn put_bytes(bucket: &Bucket, key: &str, data: &[u8]) {
        let mut writer = bucket.put_writer(key, None, None).expect("writer");
        writer.write(data).await.expect("write");
        writer.close().await.expect("close");
    }

    #[tokio::test]
    #[ignore = "requires S3 credentials and TEST_BUCKET"]
    async fn test_should_round_trip_small_object_live() {
        let bucket = bucket();
        put_bytes(&bucket, "testfile", b"test_data").await;

        let (mut reader, _headers) = bucket.get_reader("testfile", None).await.expect("reader");
        let data = read_to_end(&mut reader).await.expect("read");
        reader.close().await.expect("close");
        assert_eq!(data, b"test_data");

        bucket.delete("testfile").await.expect("delete");
    }

    #[tokio::test]
    #[ignore = "requires S3 credentials and TEST_BUCKET"]
    async fn test_should_fail_empty_upload_live() {
        let bucket = bucket();
        let mut writer = bucket.put_writer("testempty", None, None).expect("writer");
        let err = writer.close().await.expect_err("empty close");
        assert!(err.to_string().contains("0 bytes written"));
    }

    #[tokio::test]
    #[ignore = "requires S3 credentials and TEST_BUCKET"]
    async fn test_should_reject_bad_sse_header_live() {
        let bucket = bucket();
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-amz-server-side-encryption"),
            HeaderValue::from_static("AES512"),
        );
        let mut writer = bucket
            .put_writer("testhb", Some(headers), None)
            .expect("writer");

        let result = writer.write(b"foo").await;
        let err = match result {
            Err(err) => err,
            Ok(_) => writer.close().await.expect_err("bad sse header"),
        };
        assert!(err.to_string().contains("AES256"), "error: {err}");
    }

    #[tokio::test]
    #[ignore = "requires S3 credentials and TEST_BUCKET"]
    async fn test_should_round_trip_11_mib_multipart_live() {
        let bucket = bucket();
        let config = Config {
            concurrency: 3,
            part_size: 5 * MIB,
            n_try: 2,
            ..Config::default()
        };

        let data = patterned(11 * MIB as usize);
        let mut writer = bucket
            .put_writer("11mb_test.test", Some(sse_headers()), Some(config.clone()))
            .expect("writer");
        for chunk in data.chunks(MIB as usize) {
            writer.write(chunk).await.expect("write");
        }
        writer.close().await.expect("close");

        let (mut reader, _) = bucket
            .get_reader("11mb_test.test", Some(config))
            .await
            .expect("reader");
        let roundtrip = read_to_end(&mut reader).await.expect("read");
        reader.close().await.expect("close reader");
        assert_eq!(roundtrip, data);

        bucket.delete("11mb_test.test").await.expect("delete");
    }

    #[tokio::test]
    #[ignore = "requires S3 credentials and TEST_BUCKET"]
    async fn test_should_read_previous_version_live() {
        let bucket = bucket();
        let first = patterned(1024);
        put_bytes(&bucket, "key1", &first).await;

        let (mut reader, headers) = bucket.get_reader("key1", None).await.expect("reader");
        reader.close().await.expect("close");
        let Some(version) = headers
            .get("x-amz-version-id")
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned)
        else {
            // Versioning not enabled on this bucket.
            return;
        };

        let mut second = patterned(1024);
        second.reverse();
        put_bytes(&bucket, "key1", &second).await;

        let versioned_key = format!("key1?versionId={version}");
        let (mut reader, headers) = bucket
            .get_reader(&versioned_key, None)
            .await
            .expect("versioned reader");
        assert_eq!(
            headers.get("x-amz-version-id").and_then(|v| v.to_str().ok()),
            Some(version.as_str())
        );
        let data = read_to_end(&mut reader).await.expect("read");
        reader.close().await.expect("close");
        assert_eq!(data, first);
    }

    #[tokio::test]
    #[ignore = "requires S3 credentials and TEST_BUCKET"]
    async fn test_should_delete_slash_prefixed_key_live() {
        let bucket = bucket();
        put_bytes(&bucket, "delete 2", &patterned(1024)).await;
        bucket.delete("/delete 2").await.expect("delete");

        let err = bucket.get_reader("delete 2", None).await;
        assert!(matches!(err, Err(Error::Resp(resp)) if resp.status_code == 404));
    }
}
