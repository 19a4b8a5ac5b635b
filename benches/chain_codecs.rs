//! 交易编码器基准测试
//!
//! 测试场景:
//! 1. EVM EIP-1559 原生转账签名编码
//! 2. EVM ERC-20 转账（含 calldata）
//! 3. UTXO 签名编码，输入数量 1 / 10 / 50

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use chainbridge::{
    codec::{evm, utxo, BitcoinOutput, BitcoinTransaction, EvmTransaction},
    domain::{BitcoinUtxo, Chain},
    infrastructure::LocalKeySigner,
};

const KEY: [u8; 32] = [0x11; 32];
const TXID: &str = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";

fn evm_transfer(data: Vec<u8>) -> EvmTransaction {
    EvmTransaction {
        chain_id: 1,
        nonce: 42,
        max_priority_fee_per_gas: 1_500_000_000,
        max_fee_per_gas: 30_000_000_000,
        gas_limit: 21_000,
        to: [0x22; 20],
        value: 1_000_000_000_000_000_000,
        data,
    }
}

fn bench_evm(c: &mut Criterion) {
    let mut group = c.benchmark_group("evm_encode");

    let native = evm_transfer(Vec::new());
    group.bench_function("native", |b| {
        b.iter(|| evm::encode(&LocalKeySigner, black_box(&native), &KEY))
    });

    let token = evm_transfer(evm::erc20_transfer_data(&[0x33; 20], 5_000_000));
    group.bench_function("erc20", |b| {
        b.iter(|| evm::encode(&LocalKeySigner, black_box(&token), &KEY))
    });

    group.finish();
}

fn bench_utxo(c: &mut Criterion) {
    let mut group = c.benchmark_group("utxo_encode");

    for inputs in [1usize, 10, 50] {
        let tx = BitcoinTransaction {
            chain: Chain::Bitcoin,
            inputs: (0..inputs)
                .map(|i| BitcoinUtxo {
                    txid: TXID.into(),
                    vout: i as u32,
                    value: 50_000,
                })
                .collect(),
            outputs: vec![BitcoinOutput {
                address: "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4".into(),
                value: 40_000,
            }],
        };
        group.throughput(Throughput::Elements(inputs as u64));
        group.bench_with_input(BenchmarkId::new("p2wpkh", inputs), &tx, |b, tx| {
            b.iter(|| utxo::encode(&LocalKeySigner, black_box(tx), &KEY))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_evm, bench_utxo);
criterion_main!(benches);
