use fvcouple::comm::CommError;
use fvcouple::{Communicator, SerialComm, ThreadComm};

#[test]
fn serial_collectives_are_local() {
    let comm = SerialComm;
    assert_eq!(comm.rank(), 0);
    assert!(!comm.is_parallel());
    assert_eq!(comm.sum(7).unwrap(), 7);
    assert_eq!(comm.exclusive_prefix_sum(7).unwrap(), 0);
    assert_eq!(comm.all_gather(3.5f64).unwrap(), vec![3.5]);
    assert_eq!(comm.first_failed_rank(false).unwrap(), None);
    assert_eq!(comm.first_failed_rank(true).unwrap(), Some(0));
    assert_eq!(
        comm.all_to_all(vec![vec![1usize], vec![2]]),
        Err(CommError::BufferCount { expected: 1, actual: 2 })
    );
}

#[test]
fn thread_comm_reductions() {
    let results = ThreadComm::run(3, |comm| {
        let local = 10 * (comm.rank() + 1);
        (
            comm.sum(local).unwrap(),
            comm.exclusive_prefix_sum(local).unwrap(),
            comm.all_gather(comm.rank() as u32).unwrap(),
        )
    });
    assert_eq!(
        results,
        vec![
            (60, 0, vec![0, 1, 2]),
            (60, 10, vec![0, 1, 2]),
            (60, 30, vec![0, 1, 2]),
        ]
    );
}

#[test]
fn thread_comm_personalized_exchange() {
    let received = ThreadComm::run(3, |comm| {
        // Rank r sends [r, s] to every rank s, except nothing to itself
        let outgoing = (0..comm.size())
            .map(|s| if s == comm.rank() { vec![] } else { vec![comm.rank(), s] })
            .collect();
        comm.all_to_all::<usize>(outgoing).unwrap()
    });
    assert_eq!(received[0], vec![vec![], vec![1, 0], vec![2, 0]]);
    assert_eq!(received[1], vec![vec![0, 1], vec![], vec![2, 1]]);
    assert_eq!(received[2], vec![vec![0, 2], vec![1, 2], vec![]]);
}

#[test]
fn thread_comm_variable_gather_and_failure_agreement() {
    let results = ThreadComm::run(2, |comm| {
        let values: Vec<usize> = (0..comm.rank() + 1).collect();
        let gathered = comm.all_gather_varcount(&values).unwrap();
        let failed = comm.first_failed_rank(comm.rank() == 1).unwrap();
        (gathered, failed)
    });
    for (gathered, failed) in results {
        assert_eq!(gathered, vec![vec![0], vec![0, 1]]);
        assert_eq!(failed, Some(1));
    }
}

#[test]
fn thread_comm_abort_panics() {
    let result = std::panic::catch_unwind(|| {
        ThreadComm::run(1, |comm| -> () { comm.abort(3) });
    });
    assert!(result.is_err());
}
