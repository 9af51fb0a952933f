use super::{CommError, Communicator};
use ::mpi::datatype::{Partition, PartitionMut};
use ::mpi::topology::SimpleCommunicator;
use ::mpi::traits::{Communicator as _, CommunicatorCollectives};
use ::mpi::Count;

/// Inter-process ranks over MPI.
pub struct MpiComm {
    world: SimpleCommunicator,
}

impl MpiComm {
    pub fn new(world: SimpleCommunicator) -> Self {
        Self { world }
    }
}

fn displacements(counts: &[Count]) -> Vec<Count> {
    counts
        .iter()
        .scan(0, |offset, &count| {
            let current = *offset;
            *offset += count;
            Some(current)
        })
        .collect()
}

impl Communicator for MpiComm {
    fn rank(&self) -> usize {
        self.world.rank() as usize
    }

    fn size(&self) -> usize {
        self.world.size() as usize
    }

    fn all_to_all_bytes(&self, outgoing: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, CommError> {
        let size = self.size();
        if outgoing.len() != size {
            return Err(CommError::BufferCount {
                expected: size,
                actual: outgoing.len(),
            });
        }

        let send_counts: Vec<Count> = outgoing.iter().map(|buffer| buffer.len() as Count).collect();
        let mut recv_counts = vec![0 as Count; size];
        self.world.all_to_all_into(&send_counts[..], &mut recv_counts[..]);

        let send_displs = displacements(&send_counts);
        let recv_displs = displacements(&recv_counts);
        let send_buffer = outgoing.concat();
        let total: usize = recv_counts.iter().map(|&count| count as usize).sum();
        let mut recv_buffer = vec![0u8; total];
        {
            let send = Partition::new(&send_buffer[..], &send_counts[..], &send_displs[..]);
            let mut recv = PartitionMut::new(&mut recv_buffer[..], &recv_counts[..], &recv_displs[..]);
            self.world.all_to_all_varcount_into(&send, &mut recv);
        }

        Ok(recv_counts
            .iter()
            .zip(&recv_displs)
            .map(|(&count, &displ)| recv_buffer[displ as usize..(displ + count) as usize].to_vec())
            .collect())
    }

    fn abort(&self, code: i32) -> ! {
        self.world.abort(code)
    }
}
