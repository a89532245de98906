use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;

use polymodbus::prelude::*;

fn two_node_server() -> Arc<TcpServer> {
    let server = Arc::new(TcpServer::new());
    for id in [1u8, 2] {
        server.add_node(NodeRegister::new(
            UnitId::new(id),
            RegisterLayout {
                coils: RegisterSpan::new(0, 10),
                discrete_inputs: RegisterSpan::new(0, 10),
                input_registers: RegisterSpan::new(0, 10),
                holding_registers: RegisterSpan::new(0, 10),
            },
        ));
    }
    server
}

async fn test_requests_and_responses() {
    let _ = tracing_subscriber::fmt().try_init();

    let server = two_node_server();
    let address = "127.0.0.1:40022";

    let serve = {
        let server = server.clone();
        tokio::spawn(async move { server.listen_and_serve(address).await })
    };
    // give the listener a moment to bind
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = Client::new(TcpClientProvider::new(address));
    client.connect().await.unwrap();
    assert!(client.is_connected().await);

    // both nodes start with all ten coils low
    for unit in [UnitId::new(1), UnitId::new(2)] {
        assert_eq!(
            client
                .read_coils(unit, AddressRange::try_from(0, 10).unwrap())
                .await
                .unwrap(),
            vec![0x00, 0x00]
        );
    }

    // a single write comes back on the next read
    client.write_single_coil(UnitId::new(1), 3, true).await.unwrap();
    assert_eq!(
        client
            .read_coils(UnitId::new(1), AddressRange::try_from(0, 10).unwrap())
            .await
            .unwrap(),
        vec![0x08, 0x00]
    );
    // node 2 is untouched
    assert_eq!(
        client
            .read_coils(UnitId::new(2), AddressRange::try_from(0, 10).unwrap())
            .await
            .unwrap(),
        vec![0x00, 0x00]
    );

    client
        .write_multiple_registers(UnitId::new(2), 0, &[0x0102, 0x0304, 0x0506])
        .await
        .unwrap();
    assert_eq!(
        client
            .read_holding_registers(UnitId::new(2), AddressRange::try_from(0, 3).unwrap())
            .await
            .unwrap(),
        vec![0x0102, 0x0304, 0x0506]
    );

    // the application publishes inputs, the protocol reads them
    let node = server.get_node(UnitId::new(1)).unwrap();
    node.write_inputs(0, &[0xCAFE]).unwrap();
    node.write_discrete_input(0, true).unwrap();
    assert_eq!(
        client
            .read_input_registers(UnitId::new(1), AddressRange::try_from(0, 2).unwrap())
            .await
            .unwrap(),
        vec![0xCAFE, 0x0000]
    );
    assert_eq!(
        client
            .read_discrete_inputs(UnitId::new(1), AddressRange::try_from(0, 2).unwrap())
            .await
            .unwrap(),
        vec![0x01]
    );

    // mask write: (0x0012 AND 0x00F2) OR (0x0025 AND NOT 0x00F2) == 0x0017
    client
        .write_single_register(UnitId::new(1), 1, 0x0012)
        .await
        .unwrap();
    client
        .mask_write_register(UnitId::new(1), 1, 0x00F2, 0x0025)
        .await
        .unwrap();
    assert_eq!(
        client
            .read_holding_registers(UnitId::new(1), AddressRange::try_from(1, 1).unwrap())
            .await
            .unwrap(),
        vec![0x0017]
    );

    // write first, then read back in the same transaction
    assert_eq!(
        client
            .read_write_multiple_registers(
                UnitId::new(1),
                AddressRange::try_from(4, 2).unwrap(),
                4,
                &[0xAAAA, 0xBBBB],
            )
            .await
            .unwrap(),
        vec![0xAAAA, 0xBBBB]
    );

    // out-of-range access surfaces as the proper exception
    assert_eq!(
        client
            .read_holding_registers(UnitId::new(1), AddressRange::try_from(8, 3).unwrap())
            .await
            .unwrap_err(),
        RequestError::Exception(ExceptionCode::IllegalDataAddress)
    );

    // requests for an unregistered slave id are silently dropped
    assert_eq!(
        client
            .read_coils(UnitId::new(9), AddressRange::try_from(0, 1).unwrap())
            .await
            .unwrap_err(),
        RequestError::ResponseTimeout
    );

    client.close().await.unwrap();
    assert!(!client.is_connected().await);

    server.close().await;
    serve.await.unwrap().unwrap();
}

#[test]
fn can_read_and_write_values_end_to_end() {
    let rt = Runtime::new().unwrap();
    rt.block_on(test_requests_and_responses())
}

#[test]
fn quantity_bounds_are_checked_before_any_io() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        // no server is listening; validation must fail before any connect
        let client = Client::new(TcpClientProvider::new("127.0.0.1:1"));
        assert!(matches!(
            client
                .read_coils(UnitId::new(1), AddressRange::try_from(0, 2001).unwrap())
                .await
                .unwrap_err(),
            RequestError::BadRequest(_)
        ));
        assert!(matches!(
            client
                .read_holding_registers(UnitId::new(1), AddressRange::try_from(0, 126).unwrap())
                .await
                .unwrap_err(),
            RequestError::BadRequest(_)
        ));
        assert!(matches!(
            client
                .read_coils(UnitId::new(0), AddressRange::try_from(0, 1).unwrap())
                .await
                .unwrap_err(),
            RequestError::BadRequest(_)
        ));
    });
}

#[test]
fn tcp_transaction_ids_increase_per_request() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let server = two_node_server();
        let address = "127.0.0.1:40023";
        let serve = {
            let server = server.clone();
            tokio::spawn(async move { server.listen_and_serve(address).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // the server echoes the transaction id, so a mismatch in either
        // direction would fail the correlation check on every request
        let client = Client::new(TcpClientProvider::new(address));
        for _ in 0..20 {
            client
                .read_coils(UnitId::new(1), AddressRange::try_from(0, 1).unwrap())
                .await
                .unwrap();
        }

        client.close().await.unwrap();
        server.close().await;
        serve.await.unwrap().unwrap();
    });
}
