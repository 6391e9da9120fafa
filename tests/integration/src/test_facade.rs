//! Delete and head tests against the in-process stub.

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use penstock_core::Error;
    use penstock_core::digest::md5_hex;

    use crate::stub::{StoredObject, StubS3};
    use crate::{patterned, stub_bucket, stub_config};

    fn seed(stub: &StubS3, path: &str, data: Vec<u8>) {
        let etag = format!("\"{}\"", md5_hex(&data));
        stub.state.seed_object(
            path,
            None,
            StoredObject {
                data: Bytes::from(data),
                etag,
                meta: Vec::new(),
            },
        );
    }

    #[tokio::test]
    async fn test_should_delete_existing_object() {
        let stub = StubS3::start().await;
        seed(&stub, "/stub/delete1", patterned(1024));
        let bucket = stub_bucket(&stub, stub_config());

        bucket.delete("delete1").await.expect("delete");
        assert!(stub.state.object("/stub/delete1").is_none());
    }

    #[tokio::test]
    async fn test_should_normalize_leading_slash_and_spaces_on_delete() {
        let stub = StubS3::start().await;
        let bucket = stub_bucket(&stub, stub_config());

        // Unprefixed and slash-prefixed spellings address the same key.
        bucket.delete("delete 2").await.expect("delete");
        bucket.delete("/delete 2").await.expect("delete with slash");

        let deletes = stub.state.deletes.lock().clone();
        assert_eq!(deletes, vec!["/stub/delete%202", "/stub/delete%202"]);
    }

    #[tokio::test]
    async fn test_should_head_existing_object() {
        let stub = StubS3::start().await;
        let data = patterned(2048);
        let etag = format!("\"{}\"", md5_hex(&data));
        seed(&stub, "/stub/headme", data);
        let bucket = stub_bucket(&stub, stub_config());

        let headers = bucket.head("headme").await.expect("head");
        assert_eq!(
            headers.get("etag").and_then(|v| v.to_str().ok()),
            Some(etag.as_str())
        );
        assert_eq!(
            headers.get("content-length").and_then(|v| v.to_str().ok()),
            Some("2048")
        );
    }

    #[tokio::test]
    async fn test_should_fail_head_on_missing_key() {
        let stub = StubS3::start().await;
        let bucket = stub_bucket(&stub, stub_config());

        let err = bucket.head("absent").await.expect_err("head");
        match err {
            Error::Resp(resp) => assert_eq!(resp.status_code, 404),
            other => panic!("expected RespError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_should_reject_empty_key_everywhere() {
        let stub = StubS3::start().await;
        let bucket = stub_bucket(&stub, stub_config());

        assert!(bucket.put_writer("", None, None).is_err());
        assert!(bucket.get_reader("", None).await.is_err());
        assert!(bucket.delete("").await.is_err());
        assert!(bucket.head("").await.is_err());
    }
}
