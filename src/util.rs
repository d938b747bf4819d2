use crate::error::ServiceError;
use std::env;
use std::fs;
use std::path::Path;

pub fn get_env_var(name: &str) -> Result<String, ServiceError> {
    env::var(name).map_err(|_| {
        ServiceError::configuration(&format!("Environment variable '{}' not found", name))
    })
}

/// Reads a whole input file. Any failure to open or read it is reported as a
/// missing resource naming the path.
pub fn read_object(path: &Path) -> Result<Vec<u8>, ServiceError> {
    fs::read(path).map_err(|err| {
        ServiceError::resource_not_found(format!("Unable to read {}: {}", path.display(), err))
    })
}

/// Writes `object` to `path`, replacing any existing file.
pub fn write_object(path: &Path, object: Vec<u8>) -> Result<(), ServiceError> {
    fs::write(path, object).map_err(|err| {
        ServiceError::resource_not_found(format!("Unable to write {}: {}", path.display(), err))
    })
}

/// Fails unless `path` names a file that can be created or overwritten.
/// Checked before any dataset runs so an unwritable output aborts early.
pub fn check_writable(path: &Path) -> Result<(), ServiceError> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    if !parent.is_dir() {
        return Err(ServiceError::resource_not_found(format!(
            "Output directory {} does not exist",
            parent.display()
        )));
    }
    if path.is_dir() {
        return Err(ServiceError::resource_not_found(format!(
            "Output path {} is a directory",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn missing_file_is_resource_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_object(&dir.path().join("X9.csv")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResourceNotFound);
        assert!(err.msg.contains("X9.csv"));
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_object(&path, b"left_instance_id,right_instance_id\n".to_vec()).unwrap();
        assert_eq!(
            read_object(&path).unwrap(),
            b"left_instance_id,right_instance_id\n".to_vec()
        );
    }

    #[test]
    fn writable_checks_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_writable(&dir.path().join("output.csv")).is_ok());
        assert!(check_writable(dir.path()).is_err());
        let err = check_writable(&dir.path().join("missing").join("output.csv")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResourceNotFound);
    }

    #[test]
    fn missing_env_var_is_configuration_error() {
        let err = get_env_var("ER_DEDUP_SURELY_UNSET_VARIABLE").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }
}
