#[cfg(test)]
#[cfg(feature = "file")]
mod backend_tests {

    use crate::fdffile::FdfFile;
    #[cfg(feature = "mmap")]
    use crate::fdffile::FdfMmap;
    use crate::tests::fixtures::{REFERENCE_HEADER, fdf_bytes, slice_bytes, slice_lines};
    use crate::{Endian, Error, LoadOptions, load, read_directory, read_file};
    use std::fs;
    use std::path::Path;
    use tempfile::{NamedTempFile, tempdir};

    const PROCPAR: &str = "\
bvalue 1 1 1e+18 -1e+18 0 2 1 0 1 64
3 0 1000 2000
dpe 1 1 1 -1 0 2 1 0 1 64
3 0.5 -1 0.25
dro 1 1 1 -1 0 2 1 0 1 64
3 1 0 -0.5
dsl 1 1 1 -1 0 2 1 0 1 64
3 0 1 0.5
";

    /// Values of slice `n` of a {3, 2} matrix.
    fn slice_values(n: usize) -> Vec<f32> {
        (0..6).map(|v| (n * 10 + v) as f32).collect()
    }

    fn write_slices(dir: &Path, count: usize, array_dim: usize) {
        // Written out of order; the reader sorts by name.
        for n in (0..count).rev() {
            let lines = slice_lines("3, 2", "0.6,0.4,0.2", array_dim, n + 1);
            let bytes = slice_bytes(&lines, &slice_values(n));
            fs::write(dir.join(format!("slice{:03}image001echo001.fdf", n + 1)), bytes).unwrap();
        }
    }

    #[test]
    fn test_open_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let values: Vec<f32> = (0..16).map(|v| v as f32).collect();
        fs::write(temp_file.path(), fdf_bytes(REFERENCE_HEADER, &values, Endian::Little)).unwrap();

        let mut file = FdfFile::open(temp_file.path()).unwrap();
        assert_eq!(file.header().shape(), &[4, 4]);
        assert_eq!(file.read_data().unwrap(), values);

        let slice = FdfFile::open(temp_file.path()).unwrap().read_slice().unwrap();
        assert_eq!(slice.data()[[2, 1]], 6.0);
        assert_eq!(slice.header().voxel_dim(), &[2.5, 2.5]);
    }

    #[cfg(feature = "mmap")]
    #[test]
    fn test_backends_identical_slice() {
        let temp_file = NamedTempFile::new().unwrap();
        let values: Vec<f32> = (0..16).map(|v| v as f32 * -0.25).collect();
        fs::write(temp_file.path(), fdf_bytes(REFERENCE_HEADER, &values, Endian::Little)).unwrap();

        let buffered = read_file(temp_file.path(), &LoadOptions::new()).unwrap();
        let mapped = read_file(temp_file.path(), &LoadOptions::new().mmap(true)).unwrap();

        assert_eq!(buffered.header(), mapped.header());
        assert_eq!(buffered.data(), mapped.data());

        let mmap = FdfMmap::open(temp_file.path()).unwrap();
        let payload = mmap.payload().unwrap();
        assert_eq!(payload.len(), 16);
        assert_eq!(payload.to_vec_f32(), values);
    }

    #[test]
    fn test_read_directory_sorted() {
        let dir = tempdir().unwrap();
        write_slices(dir.path(), 3, 1);
        fs::write(dir.path().join("notes.txt"), "not a slice").unwrap();

        let volume = read_directory(dir.path(), &LoadOptions::new()).unwrap();
        let data = volume.data();
        assert_eq!(data.shape(), &[3, 2, 3]);
        assert_eq!(volume.header().slice_no(), Some(1));
        assert_eq!(volume.header().xyz_units(), Some("mm"));

        let voxel_dim = volume.header().voxel_dim();
        assert_eq!(voxel_dim.len(), 3);
        assert!((voxel_dim[0] - 2.0).abs() < 1e-9);
        assert!((voxel_dim[1] - 2.0).abs() < 1e-9);
        assert!((voxel_dim[2] - 2.0).abs() < 1e-9);

        // Declared {3, 2}: element [i, j] of slice n is value j * 3 + i.
        for n in 0..3 {
            for i in 0..3 {
                for j in 0..2 {
                    assert_eq!(data[[i, j, n]], (n * 10 + j * 3 + i) as f32);
                }
            }
        }
    }

    #[test]
    fn test_read_directory_time_series() {
        let dir = tempdir().unwrap();
        write_slices(dir.path(), 8, 4);

        let volume = read_directory(dir.path(), &LoadOptions::new()).unwrap();
        assert_eq!(volume.data().shape(), &[3, 2, 2, 4]);
        assert_eq!(volume.header().voxel_dim().len(), 4);
        assert_eq!(volume.header().voxel_dim()[3], 1.0);
        // Slice 6 (0-based 5) lands at space 1, time 1.
        assert_eq!(volume.data()[[0, 0, 1, 1]], 50.0);
    }

    #[test]
    fn test_read_directory_custom_extension() {
        let dir = tempdir().unwrap();
        let lines = slice_lines("3, 2", "0.6,0.4,0.2", 1, 1);
        fs::write(dir.path().join("a.img"), slice_bytes(&lines, &slice_values(0))).unwrap();

        let options = LoadOptions::new().extension("img");
        let volume = read_directory(dir.path(), &options).unwrap();
        assert_eq!(volume.data().shape(), &[3, 2, 1]);
    }

    #[test]
    fn test_read_directory_escapes_pattern_characters() {
        let root = tempdir().unwrap();
        let dir = root.path().join("scan [1]*");
        fs::create_dir(&dir).unwrap();
        write_slices(&dir, 2, 1);
        fs::create_dir(dir.join("nested.fdf")).unwrap();

        let volume = read_directory(&dir, &LoadOptions::new()).unwrap();
        assert_eq!(volume.data().shape(), &[3, 2, 2]);
        assert_eq!(volume.data()[[1, 1, 1]], 14.0);
    }

    #[test]
    fn test_empty_directory_fails() {
        let dir = tempdir().unwrap();
        let err = read_directory(dir.path(), &LoadOptions::new()).unwrap_err();
        match err {
            Error::File { path, source } => {
                assert_eq!(path, dir.path());
                assert!(matches!(*source, Error::EmptyInput));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_corrupt_slice_reports_path() {
        let dir = tempdir().unwrap();
        write_slices(dir.path(), 2, 1);
        let lines = slice_lines("3, 2", "0.6,0.4,0.2", 1, 3);
        let bad = dir.path().join("slice003image001echo001.fdf");
        fs::write(&bad, slice_bytes(&lines, &[1.0, 2.0])).unwrap();

        let err = read_directory(dir.path(), &LoadOptions::new()).unwrap_err();
        match err {
            Error::File { path, source } => {
                assert_eq!(path, bad);
                assert!(matches!(
                    *source,
                    Error::PayloadSize { expected: 24, .. }
                ));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_directory_with_procpar() {
        let dir = tempdir().unwrap();
        write_slices(dir.path(), 3, 1);
        fs::write(dir.path().join("procpar"), PROCPAR).unwrap();

        let volume = load(dir.path(), &LoadOptions::new()).unwrap();
        let gradients = volume.header().gradients().unwrap();
        assert_eq!(gradients.bvalues, vec![0.0, 1000.0, 2000.0]);
        assert_eq!(gradients.x, vec![-0.5, 1.0, -0.25]);
        assert_eq!(gradients.y, vec![1.0, 0.0, -0.5]);
        assert_eq!(gradients.z, vec![0.0, 1.0, 0.5]);

        let out = tempdir().unwrap();
        let bval = out.path().join("dwi.bval");
        let bvec = out.path().join("dwi.bvec");
        assert!(volume.save_gradients(&bval, &bvec).unwrap());
        assert_eq!(fs::read_to_string(&bval).unwrap(), "0.0 1000.0 2000.0");
        assert_eq!(
            fs::read_to_string(&bvec).unwrap(),
            "-0.5 1.0 -0.25\n1.0 0.0 -0.5\n0.0 1.0 0.5"
        );
    }

    #[test]
    fn test_load_without_procpar() {
        let dir = tempdir().unwrap();
        write_slices(dir.path(), 2, 1);

        let volume = load(dir.path(), &LoadOptions::new()).unwrap();
        assert!(volume.header().gradients().is_none());

        let out = tempdir().unwrap();
        let bval = out.path().join("dwi.bval");
        assert!(!volume.save_gradients(&bval, out.path().join("dwi.bvec")).unwrap());
        assert!(!bval.exists());
    }

    #[test]
    fn test_load_single_file_uses_parent_procpar() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("image.fdf");
        let values: Vec<f32> = (0..16).map(|v| v as f32).collect();
        fs::write(&path, fdf_bytes(REFERENCE_HEADER, &values, Endian::Little)).unwrap();
        fs::write(dir.path().join("acq.par"), PROCPAR).unwrap();

        let options = LoadOptions::new().companion("acq.par");
        let volume = load(&path, &options).unwrap();
        assert_eq!(volume.data().shape(), &[4, 4]);
        assert_eq!(volume.header().shape(), &[4, 4]);
        assert!(volume.header().gradients().is_some());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.fdf");
        assert!(matches!(
            FdfFile::open(&path),
            Err(Error::File { .. })
        ));
    }
}
