#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::cloudinit::script_executor::decode;
    use crate::cloudinit::{CloudInitError, ScriptExecutor, WriteFile};
    use crate::test_utils::{FakeCommandRunner, FakeFileWriter};

    fn executor() -> (ScriptExecutor, FakeFileWriter, FakeCommandRunner) {
        let writer = FakeFileWriter::default();
        let runner = FakeCommandRunner::default();
        let exec = ScriptExecutor::new(Arc::new(writer.clone()), Arc::new(runner.clone()), "host-1");
        (exec, writer, runner)
    }

    #[tokio::test]
    async fn test_files_written_before_commands() {
        let (exec, writer, runner) = executor();
        let script = r#"
write_files:
- path: /etc/kubernetes/a.conf
  permissions: "0640"
  owner: root:root
  content: |
    node: {{ ds.meta_data.hostname }}
- path: /etc/b.conf
  encoding: base64
  content: aGVsbG8=
  append: true
runCmd:
- kubeadm join --config /etc/kubernetes/a.conf
- echo done
"#;
        exec.execute(script).await.unwrap();

        assert_eq!(*writer.dirs.lock().unwrap(), vec!["/etc/kubernetes", "/etc"]);
        let files = writer.files.lock().unwrap().clone();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].content, "node: host-1\n");
        assert_eq!(files[0].permissions, "0640");
        assert_eq!(files[0].owner, "root:root");
        assert_eq!(files[1].content, "hello");
        assert!(files[1].append);
        assert_eq!(
            runner.commands(),
            vec!["kubeadm join --config /etc/kubernetes/a.conf", "echo done"]
        );
    }

    #[tokio::test]
    async fn test_failing_command_stops_execution() {
        let (exec, _writer, runner) = executor();
        runner.fail("first", "boom");
        let err = exec.execute("runCmd:\n- first\n- second\n").await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(runner.commands(), vec!["first"]);
    }

    #[tokio::test]
    async fn test_invalid_yaml() {
        let (exec, _writer, runner) = executor();
        let err = exec.execute("write_files: [unclosed").await.unwrap_err();
        assert!(matches!(err, CloudInitError::Parse(_)));
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_empty_document_is_noop() {
        let (exec, writer, runner) = executor();
        exec.execute("{}").await.unwrap();
        assert!(writer.files.lock().unwrap().is_empty());
        assert!(runner.commands().is_empty());
    }

    #[test]
    fn test_decode_gzip_unsupported() {
        let file = WriteFile {
            path: "/x".into(),
            encoding: "gz+b64".into(),
            content: "H4sI".into(),
            ..Default::default()
        };
        let err = decode(&file).unwrap_err();
        assert_eq!(err.to_string(), "unsupported encoding \"gz+b64\" for /x");
    }

    #[test]
    fn test_decode_bad_base64() {
        let file = WriteFile {
            path: "/x".into(),
            encoding: "b64".into(),
            content: "!!!".into(),
            ..Default::default()
        };
        assert!(matches!(decode(&file), Err(CloudInitError::Decode { .. })));
    }
}
