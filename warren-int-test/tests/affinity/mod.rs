mod affinity_test;
