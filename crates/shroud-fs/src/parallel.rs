//! Parallel chunk encryption/decryption for the bulk I/O paths.
//!
//! Jobs carry their own nonce and land their result in place, so no ordering
//! channel is needed: the caller walks the slice in index order afterwards.
//! A panicking worker is converted into an error instead of taking the
//! process down; the first error observed fails the whole batch.

use std::panic::{catch_unwind, AssertUnwindSafe};

use rayon::prelude::*;

use shroud_core::{Error, ParallelConfig, Result};
use shroud_crypto::{ContentCipher, NONCE_SIZE};

/// One chunk's worth of work for a bulk operation.
pub(crate) struct ChunkJob {
    pub index: u32,
    pub nonce: [u8; NONCE_SIZE],
    pub plaintext: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl ChunkJob {
    pub fn for_encrypt(index: u32, nonce: [u8; NONCE_SIZE], plaintext: Vec<u8>) -> Self {
        Self {
            index,
            nonce,
            plaintext,
            ciphertext: Vec::new(),
        }
    }

    pub fn for_decrypt(index: u32, nonce: [u8; NONCE_SIZE], ciphertext: Vec<u8>) -> Self {
        Self {
            index,
            nonce,
            plaintext: Vec::new(),
            ciphertext,
        }
    }
}

/// Fill in `ciphertext` for every job.
pub(crate) fn encrypt_batch(
    cipher: &ContentCipher,
    jobs: &mut [ChunkJob],
    config: &ParallelConfig,
) -> Result<()> {
    run_batch(jobs, config, |job| {
        job.ciphertext = cipher.encrypt(&job.nonce, &job.plaintext)?;
        Ok(())
    })
}

/// Fill in `plaintext` for every job.
pub(crate) fn decrypt_batch(
    cipher: &ContentCipher,
    jobs: &mut [ChunkJob],
    config: &ParallelConfig,
) -> Result<()> {
    run_batch(jobs, config, |job| {
        job.plaintext = cipher.decrypt(&job.nonce, &job.ciphertext)?;
        Ok(())
    })
}

fn run_batch<F>(jobs: &mut [ChunkJob], config: &ParallelConfig, work: F) -> Result<()>
where
    F: Fn(&mut ChunkJob) -> Result<()> + Sync,
{
    if jobs.is_empty() {
        return Ok(());
    }

    if !config.enabled || jobs.len() < config.min_chunks_for_parallel {
        for job in jobs.iter_mut() {
            work(job)?;
        }
        return Ok(());
    }

    let workers = config.effective_workers().min(jobs.len()).max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| Error::encryption("worker pool", e.to_string()))?;

    pool.install(|| {
        jobs.par_iter_mut().try_for_each(|job| {
            let index = job.index;
            match catch_unwind(AssertUnwindSafe(|| work(job))) {
                Ok(result) => result,
                Err(_) => Err(Error::encryption(
                    "bulk crypto",
                    format!("worker panicked on chunk {index}"),
                )),
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_core::CipherSuite;
    use shroud_crypto::{generate_nonce, DataKey, KEY_SIZE, TAG_SIZE};

    fn cipher() -> ContentCipher {
        ContentCipher::new(CipherSuite::Aes256Gcm, &DataKey::from_bytes(vec![1; KEY_SIZE]))
            .unwrap()
    }

    fn jobs_for(contents: &[&[u8]]) -> Vec<ChunkJob> {
        contents
            .iter()
            .enumerate()
            .map(|(i, data)| ChunkJob::for_encrypt(i as u32, generate_nonce(), data.to_vec()))
            .collect()
    }

    fn parallel_config(min_chunks: usize) -> ParallelConfig {
        ParallelConfig {
            enabled: true,
            max_workers: 4,
            min_chunks_for_parallel: min_chunks,
        }
    }

    #[test]
    fn batch_roundtrip_parallel() {
        let cipher = cipher();
        let config = parallel_config(1);
        let payloads: Vec<Vec<u8>> = (0..16u8).map(|i| vec![i; 512]).collect();
        let borrowed: Vec<&[u8]> = payloads.iter().map(|p| p.as_slice()).collect();

        let mut jobs = jobs_for(&borrowed);
        encrypt_batch(&cipher, &mut jobs, &config).unwrap();
        for (job, payload) in jobs.iter().zip(&payloads) {
            assert_eq!(job.ciphertext.len(), payload.len() + TAG_SIZE);
        }

        let mut back: Vec<ChunkJob> = jobs
            .iter()
            .map(|j| ChunkJob::for_decrypt(j.index, j.nonce, j.ciphertext.clone()))
            .collect();
        decrypt_batch(&cipher, &mut back, &config).unwrap();
        for (job, payload) in back.iter().zip(&payloads) {
            assert_eq!(&job.plaintext, payload);
        }
    }

    #[test]
    fn below_threshold_stays_sequential_but_correct() {
        let cipher = cipher();
        let config = parallel_config(100);
        let mut jobs = jobs_for(&[b"one".as_slice(), b"two"]);
        encrypt_batch(&cipher, &mut jobs, &config).unwrap();
        assert!(!jobs[0].ciphertext.is_empty());
    }

    #[test]
    fn corrupted_job_fails_the_batch() {
        let cipher = cipher();
        let config = parallel_config(1);
        let mut jobs = jobs_for(&[b"aaaa".as_slice(), b"bbbb", b"cccc", b"dddd"]);
        encrypt_batch(&cipher, &mut jobs, &config).unwrap();

        let mut back: Vec<ChunkJob> = jobs
            .iter()
            .map(|j| ChunkJob::for_decrypt(j.index, j.nonce, j.ciphertext.clone()))
            .collect();
        back[2].ciphertext[0] ^= 0xFF;
        assert!(decrypt_batch(&cipher, &mut back, &config).is_err());
    }

    #[test]
    fn disabled_config_runs_sequentially() {
        let cipher = cipher();
        let config = ParallelConfig {
            enabled: false,
            ..ParallelConfig::default()
        };
        let payloads: Vec<&[u8]> = vec![b"x".as_slice(); 8];
        let mut jobs = jobs_for(&payloads);
        encrypt_batch(&cipher, &mut jobs, &config).unwrap();
        assert!(jobs.iter().all(|j| !j.ciphertext.is_empty()));
    }
}
